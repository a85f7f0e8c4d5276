//! `self-check`: config, tables and scheduler assembly without running the engine.

use std::path::Path;

use ecu_core::error::Result as CoreResult;
use ecu_core::sim::SimRig;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub struct SelfCheck {
    pub ve_dims: usize,
    pub spark_shape: [usize; 2],
    /// Raw MAP counts and kPa from the real ADC, when built with `hardware`.
    pub adc_map: Option<(u16, f32)>,
}

pub fn self_check(cfg: &ecu_config::Config, base_dir: &Path) -> CoreResult<SelfCheck> {
    let tables = ecu_core::conversions::load_tables(&cfg.tables, base_dir)?;
    let ve_dims = if tables.ve.needs_coolant() { 3 } else { 2 };
    let spark_shape = tables.spark.shape();
    if ve_dims == 3 && cfg.sensors.coolant_channel.is_none() {
        tracing::warn!("3D VE table without sensors.coolant_channel; the warmest column is used");
    }

    // Same validation the real loop goes through, on simulated devices.
    let rig = SimRig::new();
    let scheduler = rig
        .builder()
        .with_wheel((&cfg.wheel).into())
        .with_fuel((&cfg.fuel).into())
        .with_spark((&cfg.spark).into())
        .with_scheduler((&cfg.scheduler).into())
        .with_sensors((&cfg.sensors).into())
        .with_tables(tables)
        .build()?;
    drop(scheduler);

    Ok(SelfCheck {
        ve_dims,
        spark_shape,
        adc_map: probe_adc(cfg)?,
    })
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn probe_adc(cfg: &ecu_config::Config) -> CoreResult<Option<(u16, f32)>> {
    use ecu_core::error::{EcuError, Report};
    use ecu_hardware::hardware::Mcp3304Adc;

    let p = &cfg.pins;
    let hw = |e: ecu_hardware::error::HwError| Report::new(EcuError::Hardware(e.to_string()));
    let mut adc = Mcp3304Adc::open(p.adc_bus, p.adc_slave, p.adc_clock_hz).map_err(hw)?;
    let raw = adc.read(cfg.sensors.map_channel).map_err(hw)?;
    let kpa = ecu_core::SensorCfg::from(&cfg.sensors).map.convert(raw);
    tracing::info!(raw, kpa, "ADC probe");
    Ok(Some((raw, kpa)))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn probe_adc(_cfg: &ecu_config::Config) -> CoreResult<Option<(u16, f32)>> {
    Ok(None)
}

pub fn print_self_check(r: &SelfCheck, json: bool) {
    if json {
        let obj = json!({
            "status": "ok",
            "ve_dims": r.ve_dims,
            "spark_shape": r.spark_shape,
            "adc_map": r.adc_map.map(|(raw, kpa)| json!({ "raw": raw, "kpa": kpa })),
        });
        println!("{obj}");
        return;
    }
    println!("self-check: ok");
    println!("  VE table: {}D", r.ve_dims);
    println!(
        "  spark table: {}x{}",
        r.spark_shape[0], r.spark_shape[1]
    );
    match r.adc_map {
        Some((raw, kpa)) => println!("  MAP: raw {raw} = {kpa:.1} kPa"),
        None => println!("  ADC: not probed (simulation build)"),
    }
}
