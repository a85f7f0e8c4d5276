//! `From` implementations bridging `ecu_config` types to `ecu_core` types.

use std::path::Path;
use std::sync::Arc;

use eyre::WrapErr;

use crate::calibration::{Tables, VeTable, default_spark_table, default_ve_table};
use crate::config::{ChannelCfg, FuelCfg, SchedulerCfg, SensorCfg, SparkCfg, WheelCfg};
use crate::error::{EcuError, Report, Result, TableError};
use crate::runner::SamplingMode;
use crate::table::Table;

// ── WheelCfg ─────────────────────────────────────────────────────────────────

impl From<&ecu_config::WheelCfg> for WheelCfg {
    fn from(c: &ecu_config::WheelCfg) -> Self {
        Self {
            teeth: c.teeth,
            angle_per_tooth_deg: c.angle_per_tooth_deg,
            tdc_deg: c.tdc_deg,
            tooth_tolerance_us: c.tooth_tolerance_us,
            stall_factor: c.stall_factor,
        }
    }
}

// ── FuelCfg ──────────────────────────────────────────────────────────────────

impl From<&ecu_config::FuelCfg> for FuelCfg {
    fn from(c: &ecu_config::FuelCfg) -> Self {
        Self {
            grace_deg: c.grace_deg,
            open_window_deg: c.open_window_deg,
            req_fuel_us: c.req_fuel_us,
            dead_time_us: c.dead_time_us,
            map_reference_kpa: c.map_reference_kpa,
            ve_max: c.ve_max,
        }
    }
}

// ── SparkCfg ─────────────────────────────────────────────────────────────────

impl From<&ecu_config::SparkCfg> for SparkCfg {
    fn from(c: &ecu_config::SparkCfg) -> Self {
        Self {
            dwell_us: c.dwell_us,
            spark_tolerance_us: c.spark_tolerance_us,
            advance_min_deg: c.advance_min_deg,
            advance_max_deg: c.advance_max_deg,
            close_margin_deg: c.close_margin_deg,
        }
    }
}

// ── SchedulerCfg ─────────────────────────────────────────────────────────────

impl From<&ecu_config::SchedulerCfg> for SchedulerCfg {
    fn from(c: &ecu_config::SchedulerCfg) -> Self {
        Self {
            arm_window_deg: c.arm_window_deg,
            loop_period_us: c.loop_period_us,
            max_timer_overrun_us: c.max_timer_overrun_us,
        }
    }
}

impl From<&ecu_config::SchedulerCfg> for SamplingMode {
    fn from(c: &ecu_config::SchedulerCfg) -> Self {
        match c.mode {
            ecu_config::RunMode::Direct => SamplingMode::Direct,
            ecu_config::RunMode::Sampler => SamplingMode::Paced(c.sample_rate_hz),
        }
    }
}

// ── SensorCfg ────────────────────────────────────────────────────────────────

impl From<&ecu_config::SensorsCfg> for SensorCfg {
    fn from(c: &ecu_config::SensorsCfg) -> Self {
        Self {
            map: ChannelCfg {
                channel: c.map_channel,
                per_count: c.map_kpa_per_count,
                offset: c.map_offset_kpa,
            },
            coolant: c.coolant_channel.map(|channel| ChannelCfg {
                channel,
                per_count: c.coolant_c_per_count,
                offset: c.coolant_offset_c,
            }),
        }
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

impl<const N: usize> TryFrom<&ecu_config::TableData> for Table<N> {
    type Error = TableError;

    fn try_from(t: &ecu_config::TableData) -> core::result::Result<Self, TableError> {
        let axes: [Vec<f32>; N] = t.axes.clone().try_into().map_err(|_| TableError::Dimension {
            expected: N,
            got: t.axes.len(),
        })?;
        Table::new(axes, t.data.clone())
    }
}

impl TryFrom<&ecu_config::TableData> for VeTable {
    type Error = TableError;

    fn try_from(t: &ecu_config::TableData) -> core::result::Result<Self, TableError> {
        match t.axes.len() {
            2 => Ok(VeTable::RpmMap(Arc::new(Table::<2>::try_from(t)?))),
            3 => Ok(VeTable::RpmMapCoolant(Arc::new(Table::<3>::try_from(t)?))),
            got => Err(TableError::Dimension { expected: 2, got }),
        }
    }
}

fn table_report(e: TableError) -> Report {
    Report::new(EcuError::from(e))
}

/// Load the configured tables. Relative CSV paths resolve against `base_dir`
/// (normally the directory holding the config file); absent entries fall back
/// to the compiled-in defaults.
pub fn load_tables(cfg: &ecu_config::TablesCfg, base_dir: &Path) -> Result<Tables> {
    let ve = match &cfg.ve_csv {
        Some(p) => {
            let path = base_dir.join(p);
            let data = ecu_config::load_table_csv(&path)?;
            VeTable::try_from(&data)
                .map_err(table_report)
                .wrap_err_with(|| format!("VE table {}", path.display()))?
        }
        None => VeTable::RpmMap(Arc::new(default_ve_table().map_err(table_report)?)),
    };
    let spark = match &cfg.spark_csv {
        Some(p) => {
            let path = base_dir.join(p);
            let data = ecu_config::load_table_csv(&path)?;
            Table::<2>::try_from(&data)
                .map_err(table_report)
                .wrap_err_with(|| format!("spark table {}", path.display()))?
        }
        None => default_spark_table().map_err(table_report)?,
    };
    tracing::debug!(
        ve_3d = ve.needs_coolant(),
        ve_csv = cfg.ve_csv.is_some(),
        spark_csv = cfg.spark_csv.is_some(),
        "calibration tables loaded"
    );
    Ok(Tables::new(ve, spark))
}
