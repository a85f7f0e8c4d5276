//! Fuel and spark plans derived from one engine sample.

use crate::calibration::Tables;
use crate::config::{FuelCfg, SparkCfg};
use crate::error::EcuError;
use crate::util::{angle_delta, angle_equivalent, wrap_angle};

/// Immutable snapshot the scheduler computes both plans from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSample {
    pub rpm: f32,
    pub map_kpa: f32,
    pub coolant_c: Option<f32>,
    pub deg_per_us: f32,
    pub timestamp_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelPlan {
    pub start_angle_deg: f32,
    pub end_angle_deg: f32,
    pub duration_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparkPlan {
    pub charge_start_angle_deg: f32,
    pub spark_angle_deg: f32,
    pub dwell_us: u32,
}

/// Intermediate values, kept for logging and the CLI lookup command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanDetail {
    pub advance_deg: f32,
    pub ve: f32,
    pub fuel_us: f32,
}

pub struct Planner<'a> {
    pub tables: &'a Tables,
    pub fuel: &'a FuelCfg,
    pub spark: &'a SparkCfg,
    pub tdc_deg: f32,
}

impl Planner<'_> {
    /// Clamped spark advance and VE at an operating point.
    pub fn advance_and_ve(&self, rpm: f32, map_kpa: f32, coolant_c: Option<f32>) -> (f32, f32) {
        let advance = self
            .tables
            .spark_advance(rpm, map_kpa)
            .clamp(self.spark.advance_min_deg, self.spark.advance_max_deg);
        let ve = self
            .tables
            .ve
            .lookup(rpm, map_kpa, coolant_c)
            .clamp(0.0, self.fuel.ve_max);
        (advance, ve)
    }

    /// Injector pulse width for a VE and manifold pressure.
    pub fn fuel_us(&self, ve: f32, map_kpa: f32) -> f32 {
        let load = (map_kpa / self.fuel.map_reference_kpa).max(0.0);
        self.fuel.dead_time_us + self.fuel.req_fuel_us * ve * load
    }

    /// Both plans for one cycle.
    pub fn plan(&self, sample: &EngineSample) -> Result<(FuelPlan, SparkPlan, PlanDetail), EcuError> {
        let w = sample.deg_per_us;
        if !(w.is_finite() && w > 0.0) {
            return Err(EcuError::SyncLost);
        }
        if !(sample.rpm.is_finite() && sample.map_kpa.is_finite()) {
            return Err(EcuError::State("non-finite engine sample".into()));
        }
        let tdc = self.tdc_deg;
        let (advance, ve) = self.advance_and_ve(sample.rpm, sample.map_kpa, sample.coolant_c);

        let spark_angle = wrap_angle(tdc - advance, tdc);
        let fuel_end = wrap_angle(spark_angle - self.fuel.grace_deg, tdc);

        // Keep the open window clear of the next cycle's start.
        let max_fuel_us = (tdc - self.fuel.open_window_deg).max(0.0) / w;
        let mut fuel_us = self.fuel_us(ve, sample.map_kpa);
        if fuel_us > max_fuel_us {
            tracing::warn!(fuel_us, max_fuel_us, rpm = sample.rpm, "fuel pulse clamped to cycle");
            fuel_us = max_fuel_us;
        }
        let fuel_start = wrap_angle(fuel_end - angle_equivalent(fuel_us, w), tdc);
        let dwell_us = self.spark.dwell_us;
        let charge_start = wrap_angle(spark_angle - angle_equivalent(dwell_us, w), tdc);

        if angle_delta(spark_angle, fuel_end, tdc) > self.spark.close_margin_deg {
            return Err(EcuError::State(format!(
                "fuel closes at {fuel_end:.1} deg, past spark {spark_angle:.1} deg + margin"
            )));
        }

        let fuel = FuelPlan {
            start_angle_deg: fuel_start,
            end_angle_deg: fuel_end,
            duration_us: fuel_us.round() as u32,
        };
        let spark = SparkPlan {
            charge_start_angle_deg: charge_start,
            spark_angle_deg: spark_angle,
            dwell_us: dwell_us.round() as u32,
        };
        Ok((
            fuel,
            spark,
            PlanDetail {
                advance_deg: advance,
                ve,
                fuel_us,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::VeTable;
    use crate::table::Table2;
    use std::sync::Arc;

    fn flat_tables(ve: f32, advance: f32) -> Tables {
        let axes = || [vec![0.0, 10_000.0], vec![0.0, 200.0]];
        Tables::new(
            VeTable::RpmMap(Arc::new(Table2::new(axes(), vec![ve; 4]).unwrap())),
            Table2::new(axes(), vec![advance; 4]).unwrap(),
        )
    }

    fn sample(rpm: f32, map: f32) -> EngineSample {
        EngineSample {
            rpm,
            map_kpa: map,
            coolant_c: None,
            deg_per_us: crate::util::deg_per_us_from_rpm(rpm, 360.0),
            timestamp_us: 0,
        }
    }

    #[test]
    fn spark_and_fuel_angles_from_advance() {
        let tables = flat_tables(0.8, 20.0);
        let fuel = FuelCfg::default();
        let spark = SparkCfg::default();
        let planner = Planner {
            tables: &tables,
            fuel: &fuel,
            spark: &spark,
            tdc_deg: 360.0,
        };
        let (f, s, d) = planner.plan(&sample(3000.0, 60.0)).unwrap();
        assert!((s.spark_angle_deg - 340.0).abs() < 1e-3);
        assert!((f.end_angle_deg - 330.0).abs() < 1e-3);
        // 600 + 6000 * 0.8 * 0.6
        assert!((d.fuel_us - 3480.0).abs() < 0.01);
        assert_eq!(f.duration_us, 3480);
        // 3480 us at 0.018 deg/us
        assert!((f.start_angle_deg - (330.0 - 62.64)).abs() < 0.01);
        assert!((s.charge_start_angle_deg - 286.0).abs() < 0.01);
    }

    #[test]
    fn lookups_are_clamped() {
        let tables = flat_tables(3.0, 80.0);
        let fuel = FuelCfg::default();
        let spark = SparkCfg::default();
        let planner = Planner {
            tables: &tables,
            fuel: &fuel,
            spark: &spark,
            tdc_deg: 360.0,
        };
        let (advance, ve) = planner.advance_and_ve(3000.0, 60.0, None);
        assert!((advance - 50.0).abs() < 1e-6);
        assert!((ve - 1.5).abs() < 1e-6);
    }

    #[test]
    fn long_pulse_is_clamped_to_cycle() {
        let tables = flat_tables(1.5, 10.0);
        let fuel = FuelCfg {
            req_fuel_us: 100_000.0,
            ..FuelCfg::default()
        };
        let spark = SparkCfg::default();
        let planner = Planner {
            tables: &tables,
            fuel: &fuel,
            spark: &spark,
            tdc_deg: 360.0,
        };
        let (f, _, _) = planner.plan(&sample(6000.0, 100.0)).unwrap();
        // 345 deg at 0.036 deg/us
        assert!((f.duration_us as f32 - 9583.3).abs() < 1.0);
    }

    #[test]
    fn not_turning_is_sync_lost() {
        let tables = flat_tables(0.8, 20.0);
        let fuel = FuelCfg::default();
        let spark = SparkCfg::default();
        let planner = Planner {
            tables: &tables,
            fuel: &fuel,
            spark: &spark,
            tdc_deg: 360.0,
        };
        let mut s = sample(3000.0, 60.0);
        s.deg_per_us = 0.0;
        assert_eq!(planner.plan(&s).unwrap_err(), EcuError::SyncLost);
    }
}
