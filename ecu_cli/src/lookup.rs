//! `lookup`: one interpolated table query, as the scheduler would make it.

use std::path::Path;

use ecu_core::error::{EcuError, Report, Result as CoreResult};
use serde_json::json;

use crate::cli::TableKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupResult {
    pub table: TableKind,
    pub rpm: f32,
    pub map_kpa: f32,
    pub coolant_c: Option<f32>,
    pub value: f32,
}

pub fn lookup(
    cfg: &ecu_config::Config,
    base_dir: &Path,
    table: TableKind,
    rpm: f32,
    map_kpa: f32,
    coolant_c: Option<f32>,
) -> CoreResult<LookupResult> {
    if !(rpm.is_finite() && map_kpa.is_finite() && coolant_c.is_none_or(f32::is_finite)) {
        return Err(Report::new(EcuError::Config(
            "lookup inputs must be finite".into(),
        )));
    }
    let tables = ecu_core::conversions::load_tables(&cfg.tables, base_dir)?;
    let value = match table {
        TableKind::Ve => {
            if tables.ve.needs_coolant() && coolant_c.is_none() {
                tracing::info!("no --coolant given; using the warmest coolant column");
            }
            tables.ve.lookup(rpm, map_kpa, coolant_c)
        }
        TableKind::Spark => tables.spark_advance(rpm, map_kpa),
    };
    tracing::debug!(table = table.name(), rpm, map_kpa, value, "table lookup");
    Ok(LookupResult {
        table,
        rpm,
        map_kpa,
        coolant_c,
        value,
    })
}

pub fn print_lookup(r: &LookupResult, json: bool) {
    if json {
        let obj = json!({
            "table": r.table.name(),
            "rpm": r.rpm,
            "map_kpa": r.map_kpa,
            "coolant_c": r.coolant_c,
            "value": r.value,
        });
        println!("{obj}");
        return;
    }
    match r.table {
        TableKind::Ve => println!("ve({} rpm, {} kPa) = {:.4}", r.rpm, r.map_kpa, r.value),
        TableKind::Spark => println!(
            "spark({} rpm, {} kPa) = {:.2} deg BTDC",
            r.rpm, r.map_kpa, r.value
        ),
    }
}
