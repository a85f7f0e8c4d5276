//! Calibration tables the scheduler looks up each cycle.
//!
//! Firmware defaults are compiled in; `ecu_config` CSV tables replace them.

use std::sync::Arc;

use crate::error::TableError;
use crate::table::{Table2, Table3, lookup_2d, lookup_3d};

const RPM_AXIS: [f32; 8] = [500.0, 1000.0, 1500.0, 2000.0, 3000.0, 4000.0, 5500.0, 7000.0];
const MAP_AXIS: [f32; 6] = [20.0, 30.0, 40.0, 60.0, 80.0, 100.0];

// VE fraction, rpm varies fastest (one row per MAP point).
#[rustfmt::skip]
const VE_GRID: [f32; 48] = [
    0.35, 0.38, 0.42, 0.45, 0.48, 0.50, 0.48, 0.44, // 20 kPa
    0.40, 0.44, 0.48, 0.52, 0.56, 0.58, 0.56, 0.52, // 30 kPa
    0.45, 0.50, 0.55, 0.60, 0.64, 0.66, 0.64, 0.60, // 40 kPa
    0.52, 0.58, 0.64, 0.70, 0.75, 0.78, 0.76, 0.72, // 60 kPa
    0.58, 0.64, 0.70, 0.77, 0.83, 0.86, 0.84, 0.80, // 80 kPa
    0.62, 0.68, 0.75, 0.82, 0.88, 0.92, 0.90, 0.86, // 100 kPa
];

// Spark advance in degrees before TDC.
#[rustfmt::skip]
const SPARK_GRID: [f32; 48] = [
    12.0, 16.0, 22.0, 28.0, 34.0, 36.0, 38.0, 38.0, // 20 kPa
    11.0, 15.0, 20.0, 26.0, 32.0, 34.0, 36.0, 36.0, // 30 kPa
    10.0, 14.0, 18.0, 24.0, 28.0, 31.0, 33.0, 34.0, // 40 kPa
     8.0, 10.0, 13.0, 16.0, 20.0, 24.0, 27.0, 28.0, // 60 kPa
     6.0,  8.0, 10.0, 13.0, 16.0, 20.0, 23.0, 24.0, // 80 kPa
     4.0,  6.0,  8.0, 10.0, 13.0, 16.0, 19.0, 20.0, // 100 kPa
];

/// Volumetric efficiency over RPM x MAP, optionally with a coolant axis.
#[derive(Debug, Clone)]
pub enum VeTable {
    RpmMap(Arc<Table2>),
    RpmMapCoolant(Arc<Table3>),
}

impl VeTable {
    /// VE at the operating point. A coolant table queried without a coolant
    /// reading uses its warmest column.
    pub fn lookup(&self, rpm: f32, map_kpa: f32, coolant_c: Option<f32>) -> f32 {
        match self {
            VeTable::RpmMap(t) => lookup_2d(t, rpm, map_kpa),
            VeTable::RpmMapCoolant(t) => {
                let warm = t.axis(2).last().copied().unwrap_or(0.0);
                lookup_3d(t, rpm, map_kpa, coolant_c.unwrap_or(warm))
            }
        }
    }

    pub fn needs_coolant(&self) -> bool {
        matches!(self, VeTable::RpmMapCoolant(_))
    }
}

/// Read-only table set shared by every cycle.
#[derive(Debug, Clone)]
pub struct Tables {
    pub ve: VeTable,
    pub spark: Arc<Table2>,
}

impl Tables {
    pub fn new(ve: VeTable, spark: Table2) -> Self {
        Self {
            ve,
            spark: Arc::new(spark),
        }
    }

    pub fn firmware_defaults() -> Result<Self, TableError> {
        Ok(Self::new(
            VeTable::RpmMap(Arc::new(default_ve_table()?)),
            default_spark_table()?,
        ))
    }

    /// Spark advance in degrees before TDC.
    pub fn spark_advance(&self, rpm: f32, map_kpa: f32) -> f32 {
        lookup_2d(&self.spark, rpm, map_kpa)
    }
}

pub fn default_ve_table() -> Result<Table2, TableError> {
    Table2::new([RPM_AXIS.to_vec(), MAP_AXIS.to_vec()], VE_GRID.to_vec())
}

pub fn default_spark_table() -> Result<Table2, TableError> {
    Table2::new([RPM_AXIS.to_vec(), MAP_AXIS.to_vec()], SPARK_GRID.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let t = Tables::firmware_defaults().unwrap();
        assert!(!t.ve.needs_coolant());
        // 3000 rpm / 60 kPa sits on a grid point
        assert_eq!(t.spark_advance(3000.0, 60.0), 20.0);
        assert_eq!(t.ve.lookup(3000.0, 60.0, Some(90.0)), 0.75);
    }

    #[test]
    fn coolant_table_defaults_to_warm_column() {
        let t = Table3::new(
            [vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 80.0]],
            vec![0.5, 0.5, 0.5, 0.5, 0.9, 0.9, 0.9, 0.9],
        )
        .unwrap();
        let ve = VeTable::RpmMapCoolant(Arc::new(t));
        assert!(ve.needs_coolant());
        assert!((ve.lookup(0.5, 0.5, None) - 0.9).abs() < 1e-6);
        assert!((ve.lookup(0.5, 0.5, Some(40.0)) - 0.7).abs() < 1e-6);
    }
}
