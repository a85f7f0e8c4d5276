//! Crank position and speed from tooth-edge timestamps.
//!
//! The wheel has evenly spaced teeth with one missing. The edge after the
//! missing tooth arrives roughly two average periods after the previous one;
//! that edge is angle 0. Between edges the angle is extrapolated from the
//! average tooth period.

use crate::config::WheelCfg;
use crate::shared::Shared;
use crate::util::{rpm_from_deg_per_us, wrap_angle};

/// Tracker state; only the tooth-edge handler and the stall check mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ToothWheelState {
    pub tooth_count: u16,
    pub last_edge_us: Option<u64>,
    pub avg_tooth_period_us: f32,
    pub current_angle_deg: f32,
    pub synced: bool,
    pub edges_seen: u64,
    pub sync_losses: u32,
}

/// What a tooth edge did to sync, reported for logging outside the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEvent {
    /// First edge after startup or a stall; only the timestamp was recorded.
    First,
    Tooth,
    Gap,
    SyncAcquired,
    /// Too many teeth without a gap, or a gap at the wrong tooth.
    SyncLost,
}

#[derive(Debug)]
pub struct PositionTracker {
    cfg: WheelCfg,
    state: Shared<ToothWheelState>,
}

impl PositionTracker {
    pub fn new(cfg: WheelCfg) -> Self {
        Self {
            cfg,
            state: Shared::new(ToothWheelState::default()),
        }
    }

    pub fn wheel(&self) -> &WheelCfg {
        &self.cfg
    }

    /// Tooth-edge interrupt entry point. O(1), no allocation.
    pub fn on_tooth_edge(&self, timestamp_us: u64) -> EdgeEvent {
        let cfg = self.cfg;
        let (event, snapshot) = self.state.with(|s| {
            s.edges_seen += 1;
            let Some(last) = s.last_edge_us.replace(timestamp_us) else {
                return (EdgeEvent::First, *s);
            };
            let period = timestamp_us.saturating_sub(last) as f32;

            if s.avg_tooth_period_us <= 0.0 {
                s.avg_tooth_period_us = period;
                s.tooth_count = s.tooth_count.wrapping_add(1);
                s.current_angle_deg = tooth_angle(&cfg, s.tooth_count);
                return (EdgeEvent::Tooth, *s);
            }

            let avg = s.avg_tooth_period_us;
            let gap = period > 1.5 * avg && (period - 2.0 * avg).abs() <= cfg.tooth_tolerance_us;
            if gap {
                // the gap edge follows the last physical tooth
                let misplaced = s.synced && s.tooth_count != cfg.physical_teeth().saturating_sub(1);
                s.tooth_count = 0;
                s.current_angle_deg = 0.0;
                if misplaced {
                    s.synced = false;
                    s.sync_losses += 1;
                    return (EdgeEvent::SyncLost, *s);
                }
                let event = if s.synced {
                    EdgeEvent::Gap
                } else {
                    EdgeEvent::SyncAcquired
                };
                s.synced = true;
                return (event, *s);
            }

            s.tooth_count = s.tooth_count.saturating_add(1);
            s.current_angle_deg = tooth_angle(&cfg, s.tooth_count);
            s.avg_tooth_period_us = (period + s.avg_tooth_period_us) / 2.0;
            if s.synced && s.tooth_count >= cfg.physical_teeth() {
                s.synced = false;
                s.sync_losses += 1;
                return (EdgeEvent::SyncLost, *s);
            }
            (EdgeEvent::Tooth, *s)
        });

        match event {
            EdgeEvent::SyncAcquired => tracing::info!(
                t_us = timestamp_us,
                avg_period_us = snapshot.avg_tooth_period_us,
                "crank sync acquired"
            ),
            EdgeEvent::SyncLost => tracing::warn!(
                t_us = timestamp_us,
                tooth = snapshot.tooth_count,
                "crank sync lost: gap out of place"
            ),
            _ => tracing::trace!(
                t_us = timestamp_us,
                tooth = snapshot.tooth_count,
                angle = snapshot.current_angle_deg,
                "tooth edge"
            ),
        }
        event
    }

    /// Drop sync when no edge has arrived for `stall_factor` average periods.
    /// Returns the sync status after the check.
    pub fn check_stall(&self, now_us: u64) -> bool {
        let factor = self.cfg.stall_factor;
        let stalled = self.state.with(|s| {
            let Some(last) = s.last_edge_us else {
                return None;
            };
            if s.avg_tooth_period_us <= 0.0 {
                return None;
            }
            let limit = factor * s.avg_tooth_period_us;
            let silent = now_us.saturating_sub(last) as f32;
            if silent <= limit {
                return None;
            }
            let was_synced = s.synced;
            // Restart from scratch: the next edge period would be meaningless.
            *s = ToothWheelState {
                edges_seen: s.edges_seen,
                sync_losses: s.sync_losses + u32::from(was_synced),
                ..ToothWheelState::default()
            };
            Some((was_synced, silent))
        });
        if let Some((was_synced, silent_us)) = stalled
            && was_synced
        {
            tracing::warn!(now_us, silent_us, "crank stalled, sync dropped");
        }
        self.is_synced()
    }

    pub fn is_synced(&self) -> bool {
        self.state.with(|s| s.synced)
    }

    /// Angle at the last edge.
    pub fn current_angle(&self) -> f32 {
        self.state.with(|s| s.current_angle_deg)
    }

    /// Degrees per microsecond, 0 until two edges have been seen.
    pub fn angular_velocity(&self) -> f32 {
        let avg = self.state.with(|s| s.avg_tooth_period_us);
        velocity(&self.cfg, avg)
    }

    pub fn rpm(&self) -> f32 {
        rpm_from_deg_per_us(self.angular_velocity(), self.cfg.tdc_deg)
    }

    /// Angle extrapolated from the last edge to `now_us`.
    pub fn approx_angle(&self, now_us: u64) -> f32 {
        let s = self.snapshot();
        extrapolate(&self.cfg, &s, now_us)
    }

    /// Angle, velocity and sync status read together.
    pub fn position_at(&self, now_us: u64) -> Position {
        let s = self.snapshot();
        Position {
            angle_deg: extrapolate(&self.cfg, &s, now_us),
            deg_per_us: velocity(&self.cfg, s.avg_tooth_period_us),
            synced: s.synced,
        }
    }

    pub fn snapshot(&self) -> ToothWheelState {
        self.state.get()
    }
}

/// Extrapolated crank position at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub angle_deg: f32,
    pub deg_per_us: f32,
    pub synced: bool,
}

#[inline]
fn tooth_angle(cfg: &WheelCfg, tooth: u16) -> f32 {
    wrap_angle(f32::from(tooth) * cfg.angle_per_tooth_deg, cfg.tdc_deg)
}

#[inline]
fn velocity(cfg: &WheelCfg, avg_period_us: f32) -> f32 {
    if avg_period_us > 0.0 {
        cfg.angle_per_tooth_deg / avg_period_us
    } else {
        0.0
    }
}

fn extrapolate(cfg: &WheelCfg, s: &ToothWheelState, now_us: u64) -> f32 {
    let Some(last) = s.last_edge_us else {
        return s.current_angle_deg;
    };
    let elapsed = now_us.saturating_sub(last) as f32;
    wrap_angle(
        s.current_angle_deg + elapsed * velocity(cfg, s.avg_tooth_period_us),
        cfg.tdc_deg,
    )
}
