#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and calibration-table parsing for the ECU.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Table CSV loader enforces headers and requires a complete grid.
use serde::Deserialize;

/// Trigger wheel geometry and sync tolerances.
#[derive(Debug, Deserialize, Clone)]
pub struct WheelCfg {
    /// Tooth positions on the wheel, including the missing one (36 for 36-1).
    pub teeth: u16,
    pub angle_per_tooth_deg: f32,
    /// Angle of one full cycle; angles wrap at this value.
    pub tdc_deg: f32,
    /// Max |period - 2*avg| (us) for an edge to count as the missing-tooth gap.
    #[serde(default = "default_tooth_tolerance_us")]
    pub tooth_tolerance_us: f32,
    /// Sync is dropped when no edge arrives for this many average tooth periods.
    #[serde(default = "default_stall_factor")]
    pub stall_factor: f32,
}

fn default_tooth_tolerance_us() -> f32 {
    100.0
}

fn default_stall_factor() -> f32 {
    4.0
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FuelCfg {
    /// Degrees between injector close and spark discharge.
    pub grace_deg: f32,
    /// Angular window around the start angle in which the injector may open.
    pub open_window_deg: f32,
    /// Pulse width at VE = 1.0 and MAP = map_reference_kpa.
    pub req_fuel_us: f32,
    /// Injector opening latency added to every pulse.
    pub dead_time_us: f32,
    pub map_reference_kpa: f32,
    /// Upper clamp for looked-up VE.
    pub ve_max: f32,
}

impl Default for FuelCfg {
    fn default() -> Self {
        Self {
            grace_deg: 10.0,
            open_window_deg: 15.0,
            req_fuel_us: 6_000.0,
            dead_time_us: 600.0,
            map_reference_kpa: 100.0,
            ve_max: 1.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SparkCfg {
    pub dwell_us: f32,
    /// Allowed discharge timing error before a spark is counted late.
    pub spark_tolerance_us: f32,
    pub advance_min_deg: f32,
    pub advance_max_deg: f32,
    /// Injector must be closed no later than this many degrees after discharge.
    pub close_margin_deg: f32,
}

impl Default for SparkCfg {
    fn default() -> Self {
        Self {
            dwell_us: 3_000.0,
            spark_tolerance_us: 10.0,
            advance_min_deg: -10.0,
            advance_max_deg: 50.0,
            close_margin_deg: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sampler,
    Direct,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerCfg {
    /// Compare timers are armed once the target angle is this close ahead.
    pub arm_window_deg: f32,
    /// Main loop pacing.
    pub loop_period_us: u64,
    /// Grace past a timer deadline before it is declared missed.
    pub max_timer_overrun_us: u64,
    /// "sampler" (background MAP thread) or "direct" (read inside the loop)
    pub mode: RunMode,
    /// MAP sampling rate for the background sampler.
    pub sample_rate_hz: u32,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            arm_window_deg: 15.0,
            loop_period_us: 100,
            max_timer_overrun_us: 500,
            mode: RunMode::Sampler,
            sample_rate_hz: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorsCfg {
    pub map_channel: u8,
    pub map_kpa_per_count: f32,
    #[serde(default)]
    pub map_offset_kpa: f32,
    /// When set, VE becomes a 3D lookup over coolant temperature.
    #[serde(default)]
    pub coolant_channel: Option<u8>,
    #[serde(default = "default_coolant_c_per_count")]
    pub coolant_c_per_count: f32,
    #[serde(default = "default_coolant_offset_c")]
    pub coolant_offset_c: f32,
}

fn default_coolant_c_per_count() -> f32 {
    0.05
}

fn default_coolant_offset_c() -> f32 {
    -40.0
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TablesCfg {
    /// Long-format CSV for the VE table; firmware defaults when absent.
    pub ve_csv: Option<String>,
    /// Long-format CSV for the spark advance table.
    pub spark_csv: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    pub injector: u8,
    pub coil: u8,
    /// SPI bus index of the ADC
    pub adc_bus: u8,
    pub adc_slave: u8,
    pub adc_clock_hz: u32,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            injector: 17,
            coil: 27,
            adc_bus: 0,
            adc_slave: 0,
            adc_clock_hz: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub wheel: WheelCfg,
    #[serde(default)]
    pub fuel: FuelCfg,
    #[serde(default)]
    pub spark: SparkCfg,
    #[serde(default)]
    pub scheduler: SchedulerCfg,
    pub sensors: SensorsCfg,
    #[serde(default)]
    pub tables: TablesCfg,
    #[serde(default)]
    pub pins: Pins,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Raw calibration grid as read from disk.
///
/// `axes[0]` varies fastest in `data`:
/// `index = i0 + len0 * (i1 + len1 * i2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub axis_names: Vec<String>,
    pub axes: Vec<Vec<f32>>,
    pub data: Vec<f32>,
}

/// Load a long-format table CSV.
///
/// Expected headers, exactly:
/// - `rpm,map,value` for a 2D table
/// - `rpm,map,clt,value` for a 3D table
///
/// Every axis combination must appear exactly once.
pub fn load_table_csv(path: &std::path::Path) -> eyre::Result<TableData> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open table CSV {:?}: {}", path, e))?;
    read_table_csv(rdr)
}

/// Same as `load_table_csv` but from any reader (used by tests and fuzzing).
pub fn parse_table_csv<R: std::io::Read>(reader: R) -> eyre::Result<TableData> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    read_table_csv(rdr)
}

fn read_table_csv<R: std::io::Read>(mut rdr: csv::Reader<R>) -> eyre::Result<TableData> {
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers: {}", e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    let dims = if actual == ["rpm", "map", "value"] {
        2
    } else if actual == ["rpm", "map", "clt", "value"] {
        3
    } else {
        eyre::bail!(
            "table CSV must have headers 'rpm,map,value' or 'rpm,map,clt,value', got: {}",
            actual.join(",")
        );
    };

    let mut rows: Vec<Vec<f32>> = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if rec.len() != dims + 1 {
            eyre::bail!(
                "invalid CSV row {}: expected {} fields, got {}",
                idx + 2,
                dims + 1,
                rec.len()
            );
        }
        let mut row = Vec::with_capacity(dims + 1);
        for field in rec.iter() {
            let v: f32 = field
                .parse()
                .map_err(|e| eyre::eyre!("invalid CSV row {}: {:?}: {}", idx + 2, field, e))?;
            if !v.is_finite() {
                eyre::bail!("invalid CSV row {}: non-finite value", idx + 2);
            }
            row.push(v);
        }
        rows.push(row);
    }

    let mut axes: Vec<Vec<f32>> = Vec::with_capacity(dims);
    for d in 0..dims {
        let mut axis: Vec<f32> = rows.iter().map(|r| r[d]).collect();
        axis.sort_by(f32::total_cmp);
        axis.dedup();
        if axis.len() < 2 {
            eyre::bail!(
                "axis '{}' needs at least two distinct values, got {}",
                actual[d],
                axis.len()
            );
        }
        axes.push(axis);
    }

    let size: usize = axes.iter().map(Vec::len).product();
    if rows.len() != size {
        eyre::bail!(
            "table grid incomplete: {} rows for a {} grid ({} cells)",
            rows.len(),
            axes.iter()
                .map(|a| a.len().to_string())
                .collect::<Vec<_>>()
                .join("x"),
            size
        );
    }

    let mut data: Vec<Option<f32>> = vec![None; size];
    for (n, row) in rows.iter().enumerate() {
        let mut flat = 0usize;
        let mut stride = 1usize;
        for (d, axis) in axes.iter().enumerate() {
            // Values came from this axis, so the search always hits.
            let i = axis
                .binary_search_by(|probe| probe.total_cmp(&row[d]))
                .map_err(|_| eyre::eyre!("row {} value missing from axis", n + 2))?;
            flat += i * stride;
            stride *= axis.len();
        }
        if data[flat].replace(row[dims]).is_some() {
            eyre::bail!("duplicate grid point at CSV row {}", n + 2);
        }
    }

    Ok(TableData {
        axis_names: actual[..dims].to_vec(),
        axes,
        data: data.into_iter().map(|v| v.unwrap_or(0.0)).collect(),
    })
}

const ROTATIONS: [&str; 3] = ["never", "daily", "hourly"];

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Wheel
        let w = &self.wheel;
        if w.teeth < 3 {
            eyre::bail!("wheel.teeth must be >= 3");
        }
        if !(w.angle_per_tooth_deg.is_finite() && w.angle_per_tooth_deg > 0.0) {
            eyre::bail!("wheel.angle_per_tooth_deg must be > 0");
        }
        if !(w.tdc_deg.is_finite() && w.tdc_deg > 0.0) {
            eyre::bail!("wheel.tdc_deg must be > 0");
        }
        let span = f32::from(w.teeth) * w.angle_per_tooth_deg;
        if (span - w.tdc_deg).abs() > 1e-3 {
            eyre::bail!(
                "wheel.teeth * wheel.angle_per_tooth_deg ({span}) must equal wheel.tdc_deg ({})",
                w.tdc_deg
            );
        }
        if !(w.tooth_tolerance_us.is_finite() && w.tooth_tolerance_us > 0.0) {
            eyre::bail!("wheel.tooth_tolerance_us must be > 0");
        }
        if !(w.stall_factor.is_finite() && w.stall_factor > 2.0) {
            eyre::bail!("wheel.stall_factor must be > 2.0 (the gap itself spans two teeth)");
        }

        // Fuel
        let f = &self.fuel;
        if !(f.grace_deg >= 0.0 && f.grace_deg < w.tdc_deg) {
            eyre::bail!("fuel.grace_deg must be in [0, wheel.tdc_deg)");
        }
        if !(f.open_window_deg > 0.0 && f.open_window_deg < w.tdc_deg) {
            eyre::bail!("fuel.open_window_deg must be in (0, wheel.tdc_deg)");
        }
        if !(f.req_fuel_us.is_finite() && f.req_fuel_us > 0.0) {
            eyre::bail!("fuel.req_fuel_us must be > 0");
        }
        if !(f.dead_time_us.is_finite() && f.dead_time_us >= 0.0) {
            eyre::bail!("fuel.dead_time_us must be >= 0");
        }
        if !(f.map_reference_kpa.is_finite() && f.map_reference_kpa > 0.0) {
            eyre::bail!("fuel.map_reference_kpa must be > 0");
        }
        if !(f.ve_max.is_finite() && f.ve_max > 0.0) {
            eyre::bail!("fuel.ve_max must be > 0");
        }

        // Spark
        let s = &self.spark;
        if !(s.dwell_us > 0.0 && s.dwell_us <= 20_000.0) {
            eyre::bail!("spark.dwell_us must be in (0, 20000]");
        }
        if !(s.spark_tolerance_us.is_finite() && s.spark_tolerance_us >= 0.0) {
            eyre::bail!("spark.spark_tolerance_us must be >= 0");
        }
        if !(s.advance_min_deg.is_finite()
            && s.advance_max_deg.is_finite()
            && s.advance_min_deg < s.advance_max_deg)
        {
            eyre::bail!("spark.advance_min_deg must be < spark.advance_max_deg");
        }
        if s.advance_max_deg >= w.tdc_deg {
            eyre::bail!("spark.advance_max_deg must be < wheel.tdc_deg");
        }
        if !(s.close_margin_deg.is_finite() && s.close_margin_deg >= 0.0) {
            eyre::bail!("spark.close_margin_deg must be >= 0");
        }

        // Scheduler
        let sc = &self.scheduler;
        if !(sc.arm_window_deg > 0.0 && sc.arm_window_deg < w.tdc_deg) {
            eyre::bail!("scheduler.arm_window_deg must be in (0, wheel.tdc_deg)");
        }
        if sc.loop_period_us == 0 {
            eyre::bail!("scheduler.loop_period_us must be >= 1");
        }
        if sc.max_timer_overrun_us == 0 {
            eyre::bail!("scheduler.max_timer_overrun_us must be >= 1");
        }
        if sc.sample_rate_hz == 0 {
            eyre::bail!("scheduler.sample_rate_hz must be > 0");
        }

        // Sensors
        let se = &self.sensors;
        if se.map_channel >= 8 {
            eyre::bail!("sensors.map_channel must be in 0..=7");
        }
        if !(se.map_kpa_per_count.is_finite() && se.map_kpa_per_count > 0.0) {
            eyre::bail!("sensors.map_kpa_per_count must be > 0");
        }
        if !se.map_offset_kpa.is_finite() {
            eyre::bail!("sensors.map_offset_kpa must be finite");
        }
        if let Some(ch) = se.coolant_channel {
            if ch >= 8 {
                eyre::bail!("sensors.coolant_channel must be in 0..=7");
            }
            if ch == se.map_channel {
                eyre::bail!("sensors.coolant_channel must differ from sensors.map_channel");
            }
            if !(se.coolant_c_per_count.is_finite() && se.coolant_c_per_count != 0.0) {
                eyre::bail!("sensors.coolant_c_per_count must be non-zero");
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !ROTATIONS.contains(&rot.to_ascii_lowercase().as_str())
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[wheel]
teeth = 36
angle_per_tooth_deg = 10.0
tdc_deg = 360.0

[sensors]
map_channel = 0
map_kpa_per_count = 0.05
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_toml(MINIMAL).expect("parse");
        cfg.validate().expect("valid");
        assert_eq!(cfg.fuel.grace_deg, 10.0);
        assert_eq!(cfg.scheduler.arm_window_deg, 15.0);
        assert_eq!(cfg.scheduler.mode, RunMode::Sampler);
        assert_eq!(cfg.wheel.tooth_tolerance_us, 100.0);
        assert!(cfg.sensors.coolant_channel.is_none());
        assert!(cfg.tables.ve_csv.is_none());
    }

    #[test]
    fn wheel_span_must_match_tdc() {
        let toml = MINIMAL.replace("teeth = 36", "teeth = 30");
        let cfg = load_toml(&toml).expect("parse");
        let err = cfg.validate().expect_err("span mismatch");
        assert!(err.to_string().contains("wheel.tdc_deg"));
    }

    #[test]
    fn coolant_channel_cannot_alias_map() {
        let toml = format!("{MINIMAL}coolant_channel = 0\n");
        let cfg = load_toml(&toml).expect("parse");
        let err = cfg.validate().expect_err("alias");
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn parses_2d_table_in_any_row_order() {
        let csv = "rpm,map,value\n2000,30,3\n1000,30,1\n1000,60,2\n2000,60,4\n";
        let t = parse_table_csv(csv.as_bytes()).expect("table");
        assert_eq!(t.axes, vec![vec![1000.0, 2000.0], vec![30.0, 60.0]]);
        // rpm varies fastest
        assert_eq!(t.data, vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(t.axis_names, vec!["rpm".to_string(), "map".to_string()]);
    }
}
