//! Ignition coil state machine: `Idle -> Charging -> Discharged -> Idle`.
//!
//! Charging starts one dwell before the spark angle; the spark is the coil
//! turning off. A coil left charging past its discharge deadline is forced
//! off and a fault is latched.

use ecu_traits::{Actuator, CompareTimer, Level};

use crate::error::{EcuError, TimingFault};
use crate::hw_error::map_boxed;
use crate::plan::SparkPlan;
use crate::position::Position;
use crate::shared::Shared;
use crate::util::{Approach, angle_ahead, approach, us_for_angle};
use crate::{BoxedActuator, BoxedTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilState {
    Idle,
    Charging { discharge_at_us: u64 },
    Discharged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SparkStats {
    pub sparks: u64,
    /// Discharges later than the tolerance.
    pub late_sparks: u64,
    /// Cycles skipped because the spark angle had already passed.
    pub missed_sparks: u64,
    pub max_error_us: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SparkTiming {
    pub arm_window_deg: f32,
    pub spark_tolerance_us: u64,
    pub max_timer_overrun_us: u64,
    pub tdc_deg: f32,
}

/// Charging may start late by at most half the dwell angle. A plan published
/// just after the previous spark must not read as a late charge.
#[inline]
fn late_charge_window(plan: &SparkPlan, tdc_deg: f32) -> f32 {
    angle_ahead(plan.charge_start_angle_deg, plan.spark_angle_deg, tdc_deg) / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparkEvent {
    Charging { discharge_at_us: u64 },
    Fired { error_us: u64, late: bool },
    Rearmed { at_us: u64 },
    Missed,
    Stale,
}

struct Inner<A, T> {
    coil: A,
    timer: T,
    state: CoilState,
    plan: Option<SparkPlan>,
    timer_at: Option<u64>,
    /// Charge start seen ahead of the crank since arming.
    start_ahead: bool,
    fault: Option<EcuError>,
    stats: SparkStats,
}

impl<A: Actuator, T: CompareTimer> Inner<A, T> {
    fn drive(&mut self, level: Level) -> Result<(), EcuError> {
        self.coil.set(level).map_err(map_boxed)
    }

    fn arm_timer(&mut self, at_us: u64) -> Result<(), EcuError> {
        self.timer.arm_at(at_us).map_err(map_boxed)?;
        self.timer_at = Some(at_us);
        Ok(())
    }

    fn trip(&mut self, fault: EcuError) -> EcuError {
        let _ = self.drive(Level::Off);
        self.state = CoilState::Discharged;
        self.plan = None;
        self.timer_at = None;
        self.fault.get_or_insert(fault).clone()
    }

    fn skip(&mut self) {
        self.state = CoilState::Discharged;
        self.plan = None;
        self.timer_at = None;
        self.stats.missed_sparks += 1;
    }
}

pub struct SparkController<A = BoxedActuator, T = BoxedTimer> {
    timing: SparkTiming,
    inner: Shared<Inner<A, T>>,
}

impl<A, T> core::fmt::Debug for SparkController<A, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (state, fault) = self.inner.with(|i| (i.state, i.fault.clone()));
        f.debug_struct("SparkController")
            .field("state", &state)
            .field("fault", &fault)
            .finish()
    }
}

impl<A: Actuator, T: CompareTimer> SparkController<A, T> {
    pub fn new(coil: A, timer: T, timing: SparkTiming) -> Self {
        Self {
            timing,
            inner: Shared::new(Inner {
                coil,
                timer,
                state: CoilState::Idle,
                plan: None,
                timer_at: None,
                start_ahead: false,
                fault: None,
                stats: SparkStats::default(),
            }),
        }
    }

    pub fn state(&self) -> CoilState {
        self.inner.with(|i| i.state)
    }

    pub fn plan(&self) -> Option<SparkPlan> {
        self.inner.with(|i| i.plan)
    }

    pub fn fault(&self) -> Option<EcuError> {
        self.inner.with(|i| i.fault.clone())
    }

    pub fn stats(&self) -> SparkStats {
        self.inner.with(|i| i.stats)
    }

    /// Idle with no pending plan.
    pub fn is_idle(&self) -> bool {
        self.inner
            .with(|i| i.state == CoilState::Idle && i.plan.is_none() && i.fault.is_none())
    }

    pub fn arm(&self, plan: SparkPlan) -> Result<(), EcuError> {
        self.inner.with(|i| {
            if let Some(f) = &i.fault {
                return Err(f.clone());
            }
            match (i.state, i.plan) {
                (CoilState::Idle, None) => {
                    i.plan = Some(plan);
                    i.timer_at = None;
                    i.start_ahead = false;
                    Ok(())
                }
                (state, _) => Err(EcuError::State(format!("coil busy ({state:?})"))),
            }
        })
    }

    /// Arm the compare timer once the charge start is within the arm window.
    /// A charge start already behind the crank when first seen waits for the
    /// next revolution.
    pub fn schedule(&self, now_us: u64, pos: Position) -> Result<bool, EcuError> {
        let t = self.timing;
        self.inner.with(|i| {
            let (CoilState::Idle, Some(plan), None) = (i.state, i.plan, i.timer_at) else {
                return Ok(false);
            };
            let seen = approach(
                plan.charge_start_angle_deg,
                pos.angle_deg,
                late_charge_window(&plan, t.tdc_deg),
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

    /// Spark compare-timer interrupt.
    pub fn on_timer(&self, now_us: u64, pos: Position) -> Result<SparkEvent, EcuError> {
        let t = self.timing;
        let res = self.inner.with(|i| {
            if i.fault.is_some() {
                return Ok(SparkEvent::Stale);
            }
            match (i.state, i.plan) {
                (CoilState::Idle, Some(plan)) => {
                    match approach(
                        plan.charge_start_angle_deg,
                        pos.angle_deg,
                        late_charge_window(&plan, t.tdc_deg),
                        t.arm_window_deg,
                        pos.deg_per_us,
                        t.tdc_deg,
                    ) {
                        Approach::Inside => {
                            // Starting late shortens dwell but keeps the spark angle.
                            let to_spark = angle_ahead(pos.angle_deg, plan.spark_angle_deg, t.tdc_deg);
                            let dwell = u64::from(plan.dwell_us);
                            let remaining = us_for_angle(to_spark, pos.deg_per_us).unwrap_or(dwell);
                            let discharge_at_us = now_us + remaining.min(dwell);
                            if let Err(e) = i.drive(Level::On) {
                                return Err(i.trip(e));
                            }
                            i.state = CoilState::Charging { discharge_at_us };
                            if let Err(e) = i.arm_timer(discharge_at_us) {
                                return Err(i.trip(e));
                            }
                            Ok(SparkEvent::Charging { discharge_at_us })
                        }
                        Approach::Ahead { us } => {
                            i.arm_timer(now_us + us)?;
                            Ok(SparkEvent::Rearmed { at_us: now_us + us })
                        }
                        Approach::Outside => {
                            i.skip();
                            Ok(SparkEvent::Missed)
                        }
                    }
                }
                (CoilState::Charging { discharge_at_us }, _) => {
                    if now_us < discharge_at_us {
                        i.arm_timer(discharge_at_us)?;
                        return Ok(SparkEvent::Rearmed {
                            at_us: discharge_at_us,
                        });
                    }
                    if let Err(e) = i.drive(Level::Off) {
                        return Err(i.trip(e));
                    }
                    let error_us = now_us - discharge_at_us;
                    let late = error_us > t.spark_tolerance_us;
                    i.state = CoilState::Discharged;
                    i.plan = None;
                    i.timer_at = None;
                    i.stats.sparks += 1;
                    i.stats.max_error_us = i.stats.max_error_us.max(error_us);
                    if late {
                        i.stats.late_sparks += 1;
                    }
                    Ok(SparkEvent::Fired { error_us, late })
                }
                _ => Ok(SparkEvent::Stale),
            }
        });
        match &res {
            Ok(SparkEvent::Fired {
                error_us,
                late: true,
            }) => tracing::warn!(now_us, error_us, "late spark"),
            Ok(SparkEvent::Missed) => {
                tracing::warn!(now_us, angle = pos.angle_deg, "spark window missed");
            }
            Ok(ev) => tracing::trace!(now_us, ?ev, "spark timer"),
            Err(e) => tracing::error!(error = %e, "spark timer handler failed"),
        }
        res
    }

    /// Watchdog, run from the main loop.
    pub fn check_deadline(&self, now_us: u64) -> Result<(), EcuError> {
        let overrun = self.timing.max_timer_overrun_us;
        let mut missed = false;
        let res = self.inner.with(|i| {
            if let Some(f) = &i.fault {
                return Err(f.clone());
            }
            match (i.state, i.timer_at) {
                (CoilState::Charging { discharge_at_us }, _)
                    if now_us > discharge_at_us.saturating_add(overrun) =>
                {
                    Err(i.trip(EcuError::Timing(TimingFault::SparkDischargeMissed)))
                }
                (CoilState::Idle, Some(at)) if now_us > at.saturating_add(overrun) => {
                    i.skip();
                    missed = true;
                    Ok(())
                }
                _ => Ok(()),
            }
        });
        if missed {
            tracing::warn!(now_us, "spark charge timer never fired, cycle skipped");
        }
        if let Err(e) = &res {
            tracing::error!(now_us, error = %e, "coil watchdog tripped");
        }
        res
    }

    /// `Discharged -> Idle`.
    pub fn recycle(&self) -> bool {
        self.inner.with(|i| {
            if i.state == CoilState::Discharged {
                i.state = CoilState::Idle;
                true
            } else {
                false
            }
        })
    }

    /// Drop any plan and de-energize the coil.
    pub fn suppress(&self) -> Result<(), EcuError> {
        self.inner.with(|i| {
            i.plan = None;
            i.timer_at = None;
            if matches!(i.state, CoilState::Charging { .. }) {
                i.state = CoilState::Discharged;
            }
            i.drive(Level::Off)
        })
    }

    pub fn clear_fault(&self) {
        self.inner.with(|i| {
            i.fault = None;
            i.state = CoilState::Idle;
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

    fn rig() -> (SparkController<SimulatedActuator, SimulatedTimer>, SimulatedActuator, SimulatedTimer) {
        let clock = ManualClock::new();
        let coil = SimulatedActuator::new("coil", clock);
        let timer = SimulatedTimer::new();
        let c = SparkController::new(
            coil.clone(),
            timer.clone(),
            SparkTiming {
                arm_window_deg: 15.0,
                spark_tolerance_us: 10,
                max_timer_overrun_us: 500,
                tdc_deg: 360.0,
            },
        );
        (c, coil, timer)
    }

    fn at(angle_deg: f32) -> Position {
        Position {
            angle_deg,
            deg_per_us: 0.018,
            synced: true,
        }
    }

    // 3000 us dwell at 0.018 deg/us is 54 deg
    const PLAN: SparkPlan = SparkPlan {
        charge_start_angle_deg: 286.0,
        spark_angle_deg: 340.0,
        dwell_us: 3_000,
    };

    #[test]
    fn charges_then_fires_on_time() {
        let (c, coil, timer) = rig();
        c.arm(PLAN).unwrap();
        assert!(c.schedule(0, at(280.6)).unwrap());
        assert_eq!(timer.armed(), Some(300));
        let ev = c.on_timer(300, at(286.0)).unwrap();
        assert_eq!(
            ev,
            SparkEvent::Charging {
                discharge_at_us: 3_300
            }
        );
        assert_eq!(coil.level(), Level::On);
        let ev = c.on_timer(3_300, at(340.0)).unwrap();
        assert_eq!(
            ev,
            SparkEvent::Fired {
                error_us: 0,
                late: false
            }
        );
        assert_eq!(coil.level(), Level::Off);
        assert_eq!(coil.edges().len(), 2);
        assert_eq!(c.state(), CoilState::Discharged);
        assert!(c.plan().is_none());
        assert!(c.recycle());
        assert!(c.is_idle());
    }

    #[test]
    fn late_charge_keeps_spark_angle() {
        let (c, _coil, _timer) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(280.6)).unwrap();
        // 18 deg late: 1000 us left to the spark
        let ev = c.on_timer(0, at(304.0)).unwrap();
        assert_eq!(
            ev,
            SparkEvent::Charging {
                discharge_at_us: 2_000
            }
        );
    }

    #[test]
    fn late_discharge_is_counted() {
        let (c, _coil, _timer) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(280.6)).unwrap();
        c.on_timer(0, at(286.0)).unwrap();
        let ev = c.on_timer(3_050, at(341.0)).unwrap();
        assert_eq!(
            ev,
            SparkEvent::Fired {
                error_us: 50,
                late: true
            }
        );
        assert_eq!(c.stats().late_sparks, 1);
    }

    #[test]
    fn plan_published_at_spark_angle_waits_a_cycle() {
        let (c, coil, timer) = rig();
        c.arm(PLAN).unwrap();
        // 53 deg past charge start: too late to build a useful dwell
        assert!(!c.schedule(0, at(339.0)).unwrap());
        assert_eq!(timer.armed(), None);
        assert_eq!(coil.level(), Level::Off);
        assert!(c.schedule(0, at(272.0)).unwrap());
        assert_eq!(timer.armed(), Some(778));
    }

    #[test]
    fn charge_start_just_behind_crank_waits_a_revolution() {
        let (c, coil, timer) = rig();
        c.arm(PLAN).unwrap();
        // 14 deg past charge start, inside the late window
        assert!(!c.schedule(0, at(300.0)).unwrap());
        assert!(!c.schedule(0, at(320.0)).unwrap());
        assert_eq!(timer.armed(), None);
        assert_eq!(coil.level(), Level::Off);
        assert!(c.schedule(0, at(272.0)).unwrap());
        assert_eq!(timer.armed(), Some(778));
    }

    #[test]
    fn overrun_de_energizes_and_latches() {
        let (c, coil, _timer) = rig();
        c.arm(PLAN).unwrap();
        c.schedule(0, at(280.6)).unwrap();
        c.on_timer(0, at(286.0)).unwrap();
        let err = c.check_deadline(3_501).unwrap_err();
        assert_eq!(err, EcuError::Timing(TimingFault::SparkDischargeMissed));
        assert_eq!(coil.level(), Level::Off);
        assert!(c.arm(PLAN).is_err());
    }
}
