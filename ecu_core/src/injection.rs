//! Fuel injector state machine.
//!
//! `Idle -> Armed -> Open -> Closed -> Idle`. The scheduler arms a plan and the
//! compare timer; the timer interrupt opens and closes the injector. A missed
//! close deadline forces the injector off and latches a fault that refuses
//! new plans until `clear_fault()`.

use ecu_traits::{Actuator, CompareTimer, Level};

use crate::error::{EcuError, TimingFault};
use crate::hw_error::map_boxed;
use crate::plan::FuelPlan;
use crate::position::Position;
use crate::shared::Shared;
use crate::util::{Approach, approach};
use crate::{BoxedActuator, BoxedTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    Idle,
    Armed,
    Open { close_deadline_us: u64 },
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectionStats {
    pub pulses: u64,
    /// Cycles skipped because the open window had already passed.
    pub missed_opens: u64,
    pub last_pulse_us: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct InjectionTiming {
    pub open_window_deg: f32,
    pub arm_window_deg: f32,
    pub max_timer_overrun_us: u64,
    pub tdc_deg: f32,
}

struct Inner<A, T> {
    actuator: A,
    timer: T,
    state: InjectorState,
    plan: Option<FuelPlan>,
    timer_at: Option<u64>,
    /// The start angle has been ahead of the crank since arming, so the
    /// next arrival at it is a real crossing.
    start_ahead: bool,
    opened_at_us: u64,
    fault: Option<EcuError>,
    stats: InjectionStats,
}

impl<A: Actuator, T: CompareTimer> Inner<A, T> {
    fn drive(&mut self, level: Level) -> Result<(), EcuError> {
        self.actuator.set(level).map_err(map_boxed)
    }

    fn arm_timer(&mut self, at_us: u64) -> Result<(), EcuError> {
        self.timer.arm_at(at_us).map_err(map_boxed)?;
        self.timer_at = Some(at_us);
        Ok(())
    }

    /// Injector off and the fault latched; the first fault wins.
    fn trip(&mut self, fault: EcuError) -> EcuError {
        let _ = self.drive(Level::Off);
        self.state = InjectorState::Closed;
        self.plan = None;
        self.timer_at = None;
        self.fault.get_or_insert(fault).clone()
    }
}

/// What the timer interrupt did, for logging after the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuelEvent {
    Opened { close_deadline_us: u64 },
    Closed { pulse_us: u64 },
    Rearmed { at_us: u64 },
    MissedOpen,
    Stale,
}

pub struct InjectionController<A = BoxedActuator, T = BoxedTimer> {
    timing: InjectionTiming,
    inner: Shared<Inner<A, T>>,
}

impl<A, T> core::fmt::Debug for InjectionController<A, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (state, fault) = self.inner.with(|i| (i.state, i.fault.clone()));
        f.debug_struct("InjectionController")
            .field("state", &state)
            .field("fault", &fault)
            .finish()
    }
}

impl<A: Actuator, T: CompareTimer> InjectionController<A, T> {
    pub fn new(actuator: A, timer: T, timing: InjectionTiming) -> Self {
        Self {
            timing,
            inner: Shared::new(Inner {
                actuator,
                timer,
                state: InjectorState::Idle,
                plan: None,
                timer_at: None,
                start_ahead: false,
                opened_at_us: 0,
                fault: None,
                stats: InjectionStats::default(),
            }),
        }
    }

    pub fn state(&self) -> InjectorState {
        self.inner.with(|i| i.state)
    }

    pub fn plan(&self) -> Option<FuelPlan> {
        self.inner.with(|i| i.plan)
    }

    pub fn fault(&self) -> Option<EcuError> {
        self.inner.with(|i| i.fault.clone())
    }

    pub fn stats(&self) -> InjectionStats {
        self.inner.with(|i| i.stats)
    }

    /// Idle and ready for a new plan.
    pub fn is_idle(&self) -> bool {
        self.inner
            .with(|i| i.state == InjectorState::Idle && i.fault.is_none())
    }

    /// `Idle -> Armed`. Arming while open is a timing fault.
    pub fn arm(&self, plan: FuelPlan) -> Result<(), EcuError> {
        let res = self.inner.with(|i| {
            if let Some(f) = &i.fault {
                return Err(f.clone());
            }
            match i.state {
                InjectorState::Idle => {
                    i.state = InjectorState::Armed;
                    i.plan = Some(plan);
                    i.timer_at = None;
                    i.start_ahead = false;
                    Ok(())
                }
                InjectorState::Open { .. } => {
                    Err(i.trip(EcuError::Timing(TimingFault::FuelOpenWhileOpen)))
                }
                InjectorState::Armed | InjectorState::Closed => {
                    Err(EcuError::State(format!("injector busy ({:?})", i.state)))
                }
            }
        });
        if let Err(EcuError::Timing(f)) = &res {
            tracing::error!(fault = %f, "injector forced off");
        }
        res
    }

    /// Arm the compare timer once the start angle is within the arm window.
    /// Returns true when a timer was armed.
    ///
    /// A plan whose start is already just behind the crank when first seen
    /// belongs to the next revolution; it waits for the next crossing.
    pub fn schedule(&self, now_us: u64, pos: Position) -> Result<bool, EcuError> {
        let t = self.timing;
        self.inner.with(|i| {
            let (InjectorState::Armed, Some(plan), None) = (i.state, i.plan, i.timer_at) else {
                return Ok(false);
            };
            let seen = approach(
                plan.start_angle_deg,
                pos.angle_deg,
                t.open_window_deg,
                t.arm_window_deg,
                pos.deg_per_us,
                t.tdc_deg,
            );
            if !i.start_ahead {
                if seen == Approach::Inside {
                    return Ok(false);
                }
                i.start_ahead = true;
            }
            match seen {
                Approach::Inside => i.arm_timer(now_us).map(|()| true),
                Approach::Ahead { us } => i.arm_timer(now_us + us).map(|()| true),
                Approach::Outside => Ok(false),
            }
        })
    }

    /// Fuel compare-timer interrupt.
    pub fn on_timer(&self, now_us: u64, pos: Position) -> Result<FuelEvent, EcuError> {
        let t = self.timing;
        let res = self.inner.with(|i| {
            if i.fault.is_some() {
                return Ok(FuelEvent::Stale);
            }
            match (i.state, i.plan) {
                (InjectorState::Armed, Some(plan)) => {
                    match approach(
                        plan.start_angle_deg,
                        pos.angle_deg,
                        t.open_window_deg,
                        t.arm_window_deg,
                        pos.deg_per_us,
                        t.tdc_deg,
                    ) {
                        Approach::Inside => {
                            let close_deadline_us = now_us + u64::from(plan.duration_us);
                            if let Err(e) = i.drive(Level::On) {
                                return Err(i.trip(e));
                            }
                            i.state = InjectorState::Open { close_deadline_us };
                            i.opened_at_us = now_us;
                            if let Err(e) = i.arm_timer(close_deadline_us) {
                                return Err(i.trip(e));
                            }
                            Ok(FuelEvent::Opened { close_deadline_us })
                        }
                        Approach::Ahead { us } => {
                            i.arm_timer(now_us + us)?;
                            Ok(FuelEvent::Rearmed { at_us: now_us + us })
                        }
                        Approach::Outside => {
                            i.state = InjectorState::Closed;
                            i.plan = None;
                            i.timer_at = None;
                            i.stats.missed_opens += 1;
                            Ok(FuelEvent::MissedOpen)
                        }
                    }
                }
                (InjectorState::Open { close_deadline_us }, _) => {
                    if now_us < close_deadline_us {
                        i.arm_timer(close_deadline_us)?;
                        return Ok(FuelEvent::Rearmed {
                            at_us: close_deadline_us,
                        });
                    }
                    if let Err(e) = i.drive(Level::Off) {
                        return Err(i.trip(e));
                    }
                    let pulse_us = now_us.saturating_sub(i.opened_at_us);
                    i.state = InjectorState::Closed;
                    i.plan = None;
                    i.timer_at = None;
                    i.stats.pulses += 1;
                    i.stats.last_pulse_us = Some(pulse_us);
                    Ok(FuelEvent::Closed { pulse_us })
                }
                _ => Ok(FuelEvent::Stale),
            }
        });
        match &res {
            Ok(FuelEvent::MissedOpen) => {
                tracing::warn!(now_us, angle = pos.angle_deg, "injector open window missed");
            }
            Ok(ev) => tracing::trace!(now_us, ?ev, "fuel timer"),
            Err(e) => tracing::error!(error = %e, "fuel timer handler failed"),
        }
        res
    }

    /// Watchdog, run from the main loop. A close deadline overrun forces the
    /// injector off and latches `FuelCloseMissed`. An open timer that never
    /// fired skips the cycle.
    pub fn check_deadline(&self, now_us: u64) -> Result<(), EcuError> {
        let overrun = self.timing.max_timer_overrun_us;
        let mut missed = false;
        let res = self.inner.with(|i| {
            if let Some(f) = &i.fault {
                return Err(f.clone());
            }
            match (i.state, i.timer_at) {
                (InjectorState::Open { close_deadline_us }, _)
                    if now_us > close_deadline_us.saturating_add(overrun) =>
                {
                    Err(i.trip(EcuError::Timing(TimingFault::FuelCloseMissed)))
                }
                (InjectorState::Armed, Some(at)) if now_us > at.saturating_add(overrun) => {
                    i.state = InjectorState::Closed;
                    i.plan = None;
                    i.timer_at = None;
                    i.stats.missed_opens += 1;
                    missed = true;
                    Ok(())
                }
                _ => Ok(()),
            }
        });
        if missed {
            tracing::warn!(now_us, "fuel open timer never fired, cycle skipped");
        }
        if let Err(e) = &res {
            tracing::error!(now_us, error = %e, "injector watchdog tripped");
        }
        res
    }

    /// `Closed -> Idle`.
    pub fn recycle(&self) -> bool {
        self.inner.with(|i| {
            if i.state == InjectorState::Closed {
                i.state = InjectorState::Idle;
                true
            } else {
                false
            }
        })
    }

    /// Drop any plan and force the injector off (sync lost, shutdown).
    pub fn suppress(&self) -> Result<(), EcuError> {
        self.inner.with(|i| {
            i.plan = None;
            i.timer_at = None;
            i.state = match i.state {
                InjectorState::Open { .. } | InjectorState::Closed => InjectorState::Closed,
                InjectorState::Idle | InjectorState::Armed => InjectorState::Idle,
            };
            i.drive(Level::Off)
        })
    }

    /// Clear a latched fault; the injector restarts from `Idle`.
    pub fn clear_fault(&self) {
        self.inner.with(|i| {
            i.fault = None;
            i.state = InjectorState::Idle;
            i.plan = None;
            i.timer_at = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecu_hardware::{SimulatedActuator, SimulatedTimer};
    use ecu_traits::ManualClock;

    fn timing() -> InjectionTiming {
        InjectionTiming {
            open_window_deg: 15.0,
            arm_window_deg: 15.0,
            max_timer_overrun_us: 500,
            tdc_deg: 360.0,
        }
    }

    fn rig() -> (
        InjectionController<SimulatedActuator, SimulatedTimer>,
        SimulatedActuator,
        SimulatedTimer,
        ManualClock,
    ) {
        let clock = ManualClock::new();
        let act = SimulatedActuator::new("injector", clock.clone());
        let timer = SimulatedTimer::new();
        let c = InjectionController::new(act.clone(), timer.clone(), timing());
        (c, act, timer, clock)
    }

    fn at(angle_deg: f32) -> Position {
        Position {
            angle_deg,
            deg_per_us: 0.018,
            synced: true,
        }
    }

    const PLAN: FuelPlan = FuelPlan {
        start_angle_deg: 270.0,
        end_angle_deg: 330.0,
        duration_us: 3_333,
    };

    #[test]
    fn full_cycle_opens_and_closes() {
        let (c, act, timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        assert_eq!(c.state(), InjectorState::Armed);
        // too far ahead
        assert!(!c.schedule(0, at(200.0)).unwrap());
        // 9 deg ahead: 500 us
        assert!(c.schedule(1_000, at(261.0)).unwrap());
        assert_eq!(timer.armed(), Some(1_500));

        let ev = c.on_timer(1_500, at(270.0)).unwrap();
        assert_eq!(
            ev,
            FuelEvent::Opened {
                close_deadline_us: 4_833
            }
        );
        assert_eq!(act.level(), Level::On);
        assert_eq!(timer.armed(), Some(4_833));

        let ev = c.on_timer(4_833, at(330.0)).unwrap();
        assert_eq!(ev, FuelEvent::Closed { pulse_us: 3_333 });
        assert_eq!(act.level(), Level::Off);
        assert_eq!(c.state(), InjectorState::Closed);
        assert!(c.recycle());
        assert!(c.is_idle());
        assert_eq!(c.stats().pulses, 1);
    }

    #[test]
    fn start_just_behind_crank_waits_for_next_crossing() {
        let (c, act, timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        // published 10 deg after the start angle: last revolution's crossing
        assert!(!c.schedule(0, at(280.0)).unwrap());
        assert_eq!(timer.armed(), None);
        assert_eq!(act.level(), Level::Off);
        assert!(!c.schedule(500, at(289.0)).unwrap());
        // next revolution, 9 deg ahead
        assert!(c.schedule(1_000, at(261.0)).unwrap());
        assert_eq!(timer.armed(), Some(1_500));
    }

    #[test]
    fn late_firing_skips_cycle() {
        let (c, act, _timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(265.0)).unwrap();
        let ev = c.on_timer(100, at(290.0)).unwrap();
        assert_eq!(ev, FuelEvent::MissedOpen);
        assert_eq!(act.level(), Level::Off);
        assert_eq!(c.stats().missed_opens, 1);
        assert_eq!(c.state(), InjectorState::Closed);
    }

    #[test]
    fn missed_close_latches_fault() {
        let (c, act, _timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(261.0)).unwrap();
        c.on_timer(0, at(270.0)).unwrap();
        assert_eq!(act.level(), Level::On);

        // within overrun grace
        c.check_deadline(3_333 + 500).unwrap();
        let err = c.check_deadline(3_333 + 501).unwrap_err();
        assert_eq!(err, EcuError::Timing(TimingFault::FuelCloseMissed));
        assert_eq!(act.level(), Level::Off);
        assert_eq!(c.state(), InjectorState::Closed);

        // sticky until cleared
        assert!(c.arm(PLAN).is_err());
        assert!(c.check_deadline(10_000).is_err());
        c.clear_fault();
        c.arm(PLAN).unwrap();
    }

    #[test]
    fn arming_while_open_is_fatal() {
        let (c, act, _timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(261.0)).unwrap();
        c.on_timer(0, at(270.0)).unwrap();
        let err = c.arm(PLAN).unwrap_err();
        assert_eq!(err, EcuError::Timing(TimingFault::FuelOpenWhileOpen));
        assert_eq!(act.level(), Level::Off);
    }

    #[test]
    fn suppress_forces_off_and_ignores_stale_timer() {
        let (c, act, _timer, _clock) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(261.0)).unwrap();
        c.on_timer(0, at(270.0)).unwrap();
        c.suppress().unwrap();
        assert_eq!(act.level(), Level::Off);
        assert_eq!(c.on_timer(3_333, at(330.0)).unwrap(), FuelEvent::Stale);
        assert!(c.recycle());
    }
}
