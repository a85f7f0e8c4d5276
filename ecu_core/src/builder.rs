//! Type-state builder for `Scheduler`.
//!
//! The builder enforces at compile time that the MAP sensor, the injector and
//! the coil are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use ecu_traits::{Actuator, AnalogInput, Clock, CompareTimer, MonotonicClock};

use crate::calibration::Tables;
use crate::config::{FuelCfg, SchedulerCfg, SensorCfg, SparkCfg, WheelCfg};
use crate::error::{BuildError, EcuError, Result};
use crate::injection::{InjectionController, InjectionTiming};
use crate::position::PositionTracker;
use crate::scheduler::{MapSource, Scheduler, SchedulerStats};
use crate::spark::{SparkController, SparkTiming};
use crate::{BoxedActuator, BoxedTimer};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

type Output = (BoxedActuator, BoxedTimer);

/// Builder for `Scheduler`. All fields are validated on `build()`.
pub struct EcuBuilder<S, I, C> {
    sensor: Option<Box<dyn AnalogInput + Send>>,
    injector: Option<Output>,
    coil: Option<Output>,
    tables: Option<Tables>,
    default_tables: bool,
    wheel: Option<WheelCfg>,
    fuel: Option<FuelCfg>,
    spark: Option<SparkCfg>,
    scheduler: Option<SchedulerCfg>,
    sensors: Option<SensorCfg>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _i: PhantomData<I>,
    _c: PhantomData<C>,
}

impl Default for EcuBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            injector: None,
            coil: None,
            tables: None,
            default_tables: false,
            wheel: None,
            fuel: None,
            spark: None,
            scheduler: None,
            sensors: None,
            clock: None,
            _s: PhantomData,
            _i: PhantomData,
            _c: PhantomData,
        }
    }
}

impl Scheduler {
    /// Start building a Scheduler.
    pub fn builder() -> EcuBuilder<Missing, Missing, Missing> {
        EcuBuilder::default()
    }
}

impl<S, I, C> EcuBuilder<S, I, C> {
    fn retype<S2, I2, C2>(self) -> EcuBuilder<S2, I2, C2> {
        EcuBuilder {
            sensor: self.sensor,
            injector: self.injector,
            coil: self.coil,
            tables: self.tables,
            default_tables: self.default_tables,
            wheel: self.wheel,
            fuel: self.fuel,
            spark: self.spark,
            scheduler: self.scheduler,
            sensors: self.sensors,
            clock: self.clock,
            _s: PhantomData,
            _i: PhantomData,
            _c: PhantomData,
        }
    }

    pub fn with_sensor(mut self, sensor: impl AnalogInput + Send + 'static) -> EcuBuilder<Set, I, C> {
        self.sensor = Some(Box::new(sensor));
        self.retype()
    }

    pub fn with_injector(
        mut self,
        actuator: impl Actuator + Send + 'static,
        timer: impl CompareTimer + Send + 'static,
    ) -> EcuBuilder<S, Set, C> {
        self.injector = Some((Box::new(actuator), Box::new(timer)));
        self.retype()
    }

    pub fn with_coil(
        mut self,
        actuator: impl Actuator + Send + 'static,
        timer: impl CompareTimer + Send + 'static,
    ) -> EcuBuilder<S, I, Set> {
        self.coil = Some((Box::new(actuator), Box::new(timer)));
        self.retype()
    }

    pub fn with_tables(mut self, tables: Tables) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Use the compiled-in VE and spark tables.
    pub fn with_default_tables(mut self) -> Self {
        self.default_tables = true;
        self
    }

    pub fn with_wheel(mut self, wheel: WheelCfg) -> Self {
        self.wheel = Some(wheel);
        self
    }

    pub fn with_fuel(mut self, fuel: FuelCfg) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_spark(mut self, spark: SparkCfg) -> Self {
        self.spark = Some(spark);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerCfg) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_sensors(mut self, sensors: SensorCfg) -> Self {
        self.sensors = Some(sensors);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Scheduler> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        let (inj_act, inj_timer) = self
            .injector
            .ok_or_else(|| eyre::Report::new(BuildError::MissingInjector))?;
        let (coil_act, coil_timer) = self
            .coil
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCoil))?;
        let tables = match (self.tables, self.default_tables) {
            (Some(t), _) => t,
            (None, true) => Tables::firmware_defaults()
                .map_err(|e| eyre::Report::new(EcuError::from(e)))?,
            (None, false) => return Err(eyre::Report::new(BuildError::MissingTables)),
        };

        validate_and_build(
            sensor,
            (inj_act, inj_timer),
            (coil_act, coil_timer),
            tables,
            self.wheel.unwrap_or_default(),
            self.fuel.unwrap_or_default(),
            self.spark.unwrap_or_default(),
            self.scheduler.unwrap_or_default(),
            self.sensors.unwrap_or_default(),
            self.clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
        )
    }
}

impl EcuBuilder<Set, Set, Set> {
    /// Build with compile-time guarantees that required fields were provided.
    pub fn build(self) -> Result<Scheduler> {
        self.try_build()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration and wire the tracker, controllers and scheduler.
#[allow(clippy::too_many_arguments)]
fn validate_and_build(
    sensor: Box<dyn AnalogInput + Send>,
    injector: Output,
    coil: Output,
    tables: Tables,
    wheel: WheelCfg,
    fuel: FuelCfg,
    spark: SparkCfg,
    scheduler: SchedulerCfg,
    sensors: SensorCfg,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<Scheduler> {
    // ── Validation ───────────────────────────────────────────────────────────
    if wheel.teeth < 3 {
        return Err(invalid("wheel needs at least 3 tooth positions"));
    }
    if !(wheel.angle_per_tooth_deg > 0.0 && wheel.tdc_deg > 0.0) {
        return Err(invalid("wheel angles must be > 0"));
    }
    if !(wheel.tooth_tolerance_us > 0.0) {
        return Err(invalid("tooth_tolerance_us must be > 0"));
    }
    if !(wheel.stall_factor > 2.0) {
        return Err(invalid("stall_factor must be > 2"));
    }
    if fuel.grace_deg < 0.0 || !(fuel.open_window_deg > 0.0) {
        return Err(invalid("fuel angles out of range"));
    }
    if !(fuel.map_reference_kpa > 0.0) {
        return Err(invalid("map_reference_kpa must be > 0"));
    }
    if !(spark.dwell_us > 0.0) {
        return Err(invalid("dwell_us must be > 0"));
    }
    if !(spark.advance_min_deg < spark.advance_max_deg) {
        return Err(invalid("advance_min_deg must be < advance_max_deg"));
    }
    if spark.close_margin_deg < 0.0 {
        return Err(invalid("close_margin_deg must be >= 0"));
    }
    if !(scheduler.arm_window_deg > 0.0) || scheduler.loop_period_us == 0 {
        return Err(invalid("scheduler timing must be > 0"));
    }
    if sensors.map.per_count == 0.0 {
        return Err(invalid("map conversion gain must be non-zero"));
    }
    if tables.ve.needs_coolant() && sensors.coolant.is_none() {
        return Err(invalid("coolant VE table requires a coolant channel"));
    }

    // ── Wiring ───────────────────────────────────────────────────────────────
    let injection = InjectionController::new(
        injector.0,
        injector.1,
        InjectionTiming {
            open_window_deg: fuel.open_window_deg,
            arm_window_deg: scheduler.arm_window_deg,
            max_timer_overrun_us: scheduler.max_timer_overrun_us,
            tdc_deg: wheel.tdc_deg,
        },
    );
    let coil = SparkController::new(
        coil.0,
        coil.1,
        SparkTiming {
            arm_window_deg: scheduler.arm_window_deg,
            spark_tolerance_us: spark.spark_tolerance_us.max(0.0).round() as u64,
            max_timer_overrun_us: scheduler.max_timer_overrun_us,
            tdc_deg: wheel.tdc_deg,
        },
    );

    Ok(Scheduler {
        tracker: Arc::new(PositionTracker::new(wheel)),
        injection: Arc::new(injection),
        spark: Arc::new(coil),
        source: MapSource::Direct(sensor),
        clock,
        tables,
        fuel_cfg: fuel,
        spark_cfg: spark,
        sched_cfg: scheduler,
        sensors,
        last_sample: None,
        last_plan: None,
        stats: SchedulerStats::default(),
        was_synced: false,
    })
}
