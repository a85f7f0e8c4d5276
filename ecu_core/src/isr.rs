//! Interrupt-vector surface.
//!
//! Board glue (or the simulator) calls these from the tooth-edge input
//! capture and the two compare-timer interrupts. Each handler is O(1) and
//! only touches state through the owning component's critical sections.

use std::sync::Arc;

use ecu_traits::Clock;

use crate::error::EcuError;
use crate::injection::{FuelEvent, InjectionController};
use crate::position::{EdgeEvent, PositionTracker};
use crate::spark::{SparkController, SparkEvent};

#[derive(Clone)]
pub struct InterruptHandlers {
    tracker: Arc<PositionTracker>,
    injection: Arc<InjectionController>,
    spark: Arc<SparkController>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl InterruptHandlers {
    pub fn new(
        tracker: Arc<PositionTracker>,
        injection: Arc<InjectionController>,
        spark: Arc<SparkController>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            tracker,
            injection,
            spark,
            clock,
        }
    }

    /// Tooth edge captured at `timestamp_us`.
    pub fn on_tooth_edge(&self, timestamp_us: u64) -> EdgeEvent {
        let ev = self.tracker.on_tooth_edge(timestamp_us);
        if ev == EdgeEvent::SyncLost {
            let fuel = self.injection.suppress();
            let spark = self.spark.suppress();
            if let Err(e) = fuel.and(spark) {
                tracing::error!(t_us = timestamp_us, error = %e, "de-energize on sync loss failed");
            }
        }
        ev
    }

    pub fn on_fuel_timer(&self) -> Result<FuelEvent, EcuError> {
        let now = self.clock.now_us();
        let pos = self.tracker.position_at(now);
        if !pos.synced {
            self.injection.suppress()?;
            return Ok(FuelEvent::Stale);
        }
        self.injection.on_timer(now, pos)
    }

    pub fn on_spark_timer(&self) -> Result<SparkEvent, EcuError> {
        let now = self.clock.now_us();
        let pos = self.tracker.position_at(now);
        if !pos.synced {
            self.spark.suppress()?;
            return Ok(SparkEvent::Stale);
        }
        self.spark.on_timer(now, pos)
    }
}
