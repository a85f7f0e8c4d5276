//! Main loop: sample, plan, publish, arm.
//!
//! `step()` never blocks. Plans are recomputed once per cycle, after both
//! controllers have finished with the previous one, and are published to the
//! two controllers inside one critical section.

use std::sync::Arc;

use ecu_traits::{AnalogInput, Clock};

use crate::calibration::Tables;
use crate::config::{FuelCfg, SchedulerCfg, SensorCfg, SparkCfg, WheelCfg};
use crate::error::{EcuError, Report, Result};
use crate::hw_error::map_hw_error;
use crate::injection::InjectionController;
use crate::isr::InterruptHandlers;
use crate::plan::{EngineSample, FuelPlan, PlanDetail, Planner, SparkPlan};
use crate::position::{Position, PositionTracker};
use crate::sampler::RawSample;
use crate::spark::SparkController;
use crate::status::CycleStatus;
use crate::util::rpm_from_deg_per_us;

/// Where MAP (and coolant) readings come from.
pub enum MapSource {
    /// Read the ADC inside `step()` whenever a plan is due.
    Direct(Box<dyn AnalogInput + Send>),
    /// Latest sample pushed by a background sampler via `feed_raw`.
    Fed(Option<RawSample>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub steps: u64,
    pub plans: u64,
    pub unsynced_steps: u64,
}

pub struct Scheduler {
    pub(crate) tracker: Arc<PositionTracker>,
    pub(crate) injection: Arc<InjectionController>,
    pub(crate) spark: Arc<SparkController>,
    pub(crate) source: MapSource,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) tables: Tables,
    pub(crate) fuel_cfg: FuelCfg,
    pub(crate) spark_cfg: SparkCfg,
    pub(crate) sched_cfg: SchedulerCfg,
    pub(crate) sensors: SensorCfg,
    pub(crate) last_sample: Option<EngineSample>,
    pub(crate) last_plan: Option<(FuelPlan, SparkPlan, PlanDetail)>,
    pub(crate) stats: SchedulerStats,
    pub(crate) was_synced: bool,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("synced", &self.was_synced)
            .field("injection", &self.injection)
            .field("spark", &self.spark)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Scheduler {
    /// One non-blocking iteration of the main loop.
    pub fn step(&mut self) -> Result<CycleStatus> {
        let now = self.clock.now_us();
        self.stats.steps += 1;

        if !self.tracker.check_stall(now) {
            self.stats.unsynced_steps += 1;
            if self.was_synced {
                tracing::warn!(now_us = now, "no crank sync, actuation suppressed");
                self.was_synced = false;
            }
            self.suppress()?;
            return Ok(CycleStatus::Unsynced);
        }
        if !self.was_synced {
            tracing::info!(now_us = now, "crank synced, actuation enabled");
            self.was_synced = true;
        }

        let watchdog = self
            .injection
            .check_deadline(now)
            .and_then(|()| self.spark.check_deadline(now));
        if let Err(e) = watchdog {
            if let Err(off) = self.suppress() {
                tracing::error!(now_us = now, fault = %e, error = %off, "safe-state de-energize failed");
            }
            return Ok(CycleStatus::Faulted(e));
        }

        self.injection.recycle();
        self.spark.recycle();

        let pos = self.tracker.position_at(now);
        let mut status = CycleStatus::Waiting;
        if self.injection.is_idle()
            && self.spark.is_idle()
            && let Some(sample) = self.sample(now, &pos)?
        {
            self.publish(sample)?;
            status = CycleStatus::Planned;
        }

        self.injection.schedule(now, pos).map_err(Report::new)?;
        self.spark.schedule(now, pos).map_err(Report::new)?;
        Ok(status)
    }

    fn sample(&mut self, now_us: u64, pos: &Position) -> Result<Option<EngineSample>> {
        let sensors = self.sensors;
        let raw = match &mut self.source {
            MapSource::Direct(adc) => {
                let map = adc
                    .read_channel(sensors.map.channel)
                    .map_err(|e| Report::new(map_hw_error(e.as_ref())))?;
                let coolant = match sensors.coolant {
                    Some(ch) => Some(
                        adc.read_channel(ch.channel)
                            .map_err(|e| Report::new(map_hw_error(e.as_ref())))?,
                    ),
                    None => None,
                };
                RawSample { map, coolant }
            }
            MapSource::Fed(Some(raw)) => *raw,
            MapSource::Fed(None) => return Ok(None),
        };
        let coolant_c = match (sensors.coolant, raw.coolant) {
            (Some(ch), Some(r)) => Some(ch.convert(r)),
            _ => None,
        };
        Ok(Some(EngineSample {
            rpm: rpm_from_deg_per_us(pos.deg_per_us, self.tracker.wheel().tdc_deg),
            map_kpa: sensors.map.convert(raw.map),
            coolant_c,
            deg_per_us: pos.deg_per_us,
            timestamp_us: now_us,
        }))
    }

    fn publish(&mut self, sample: EngineSample) -> Result<()> {
        let planner = Planner {
            tables: &self.tables,
            fuel: &self.fuel_cfg,
            spark: &self.spark_cfg,
            tdc_deg: self.tracker.wheel().tdc_deg,
        };
        let (fuel, spark, detail) = planner.plan(&sample).map_err(Report::new)?;

        let injection = &self.injection;
        let coil = &self.spark;
        critical_section::with(|_| -> core::result::Result<(), EcuError> {
            injection.arm(fuel)?;
            coil.arm(spark)
        })
        .map_err(Report::new)?;

        if self.stats.plans == 0 {
            tracing::info!(
                rpm = sample.rpm,
                map_kpa = sample.map_kpa,
                spark_deg = spark.spark_angle_deg,
                fuel_end_deg = fuel.end_angle_deg,
                fuel_us = fuel.duration_us,
                "first plan published"
            );
        } else {
            tracing::debug!(
                rpm = sample.rpm,
                map_kpa = sample.map_kpa,
                advance = detail.advance_deg,
                ve = detail.ve,
                fuel_start = fuel.start_angle_deg,
                fuel_us = fuel.duration_us,
                charge_start = spark.charge_start_angle_deg,
                "plans published"
            );
        }
        self.stats.plans += 1;
        self.last_sample = Some(sample);
        self.last_plan = Some((fuel, spark, detail));
        Ok(())
    }

    /// Force both actuators off and drop pending plans.
    pub fn suppress(&self) -> Result<()> {
        let a = self.injection.suppress();
        let b = self.spark.suppress();
        a.and(b).map_err(Report::new)
    }

    /// Latest reading from a background sampler.
    pub fn feed_raw(&mut self, raw: RawSample) {
        match &mut self.source {
            MapSource::Fed(slot) => *slot = Some(raw),
            MapSource::Direct(_) => {
                tracing::trace!("feed_raw ignored: scheduler reads its sensor directly");
            }
        }
    }

    /// Hand the ADC to a background sampler; the scheduler then waits for `feed_raw`.
    pub fn detach_sensor(&mut self) -> Option<Box<dyn AnalogInput + Send>> {
        match std::mem::replace(&mut self.source, MapSource::Fed(None)) {
            MapSource::Direct(adc) => Some(adc),
            fed @ MapSource::Fed(_) => {
                self.source = fed;
                None
            }
        }
    }

    /// Clear latched controller faults after the cause has been dealt with.
    pub fn clear_faults(&self) {
        self.injection.clear_fault();
        self.spark.clear_fault();
    }

    /// Interrupt entry points sharing this scheduler's state.
    pub fn interrupt_handlers(&self) -> InterruptHandlers {
        InterruptHandlers::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.injection),
            Arc::clone(&self.spark),
            Arc::clone(&self.clock),
        )
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn injection(&self) -> &InjectionController {
        &self.injection
    }

    pub fn spark(&self) -> &SparkController {
        &self.spark
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        Arc::clone(&self.clock)
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn wheel(&self) -> &WheelCfg {
        self.tracker.wheel()
    }

    pub fn scheduler_cfg(&self) -> &SchedulerCfg {
        &self.sched_cfg
    }

    pub fn sensors(&self) -> &SensorCfg {
        &self.sensors
    }

    pub fn last_sample(&self) -> Option<EngineSample> {
        self.last_sample
    }

    pub fn last_plan(&self) -> Option<(FuelPlan, SparkPlan, PlanDetail)> {
        self.last_plan
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}
