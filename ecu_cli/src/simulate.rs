//! `simulate`: the full engine loop against the discrete-event rig.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use ecu_core::error::{EcuError, Report, Result as CoreResult};
use ecu_core::plan::PlanDetail;
use ecu_core::sim::SimRig;
use ecu_core::{
    FuelCfg, FuelPlan, RunOptions, RunSummary, SamplingMode, SchedulerCfg, SensorCfg, SparkCfg,
    SparkPlan, WheelCfg, run,
};
use ecu_hardware::CrankWheel;
use serde_json::json;

/// Coolant reading used when a coolant channel is configured but `--coolant`
/// is not given.
const DEFAULT_COOLANT_C: f32 = 90.0;
/// First crank edge arrives this long after simulated time zero.
const CRANK_START_US: u64 = 1_000;
const MAX_RPM: f32 = 20_000.0;

#[derive(Debug, Clone, Copy)]
pub struct SimArgs {
    pub rpm: f32,
    pub map_kpa: f32,
    pub coolant_c: Option<f32>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseStats {
    pub count: usize,
    pub min_us: u64,
    pub mean_us: f64,
    pub max_us: u64,
}

impl PulseStats {
    fn from_pulses(pulses: &[(u64, u64)]) -> Option<Self> {
        let widths: Vec<u64> = pulses.iter().map(|(on, off)| off - on).collect();
        let min_us = *widths.iter().min()?;
        let max_us = *widths.iter().max()?;
        let mean_us = widths.iter().sum::<u64>() as f64 / widths.len() as f64;
        Some(Self {
            count: widths.len(),
            min_us,
            mean_us,
            max_us,
        })
    }

    fn to_json(self) -> serde_json::Value {
        json!({
            "count": self.count,
            "min_us": self.min_us,
            "mean_us": self.mean_us,
            "max_us": self.max_us,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimReport {
    pub summary: RunSummary,
    pub simulated_us: u64,
    pub last_plan: Option<(FuelPlan, SparkPlan, PlanDetail)>,
    pub injector: Option<PulseStats>,
    pub dwell: Option<PulseStats>,
}

fn arg_error(msg: impl Into<String>) -> Report {
    Report::new(EcuError::Config(msg.into()))
}

fn check_args(args: &SimArgs, wheel: &WheelCfg) -> CoreResult<()> {
    let max_rpm = wheel.max_rpm().min(MAX_RPM).floor();
    if !(args.rpm.is_finite() && args.rpm > 0.0 && args.rpm <= max_rpm) {
        return Err(arg_error(format!(
            "--rpm must be in (0, {max_rpm}] for this wheel and wheel.tooth_tolerance_us"
        )));
    }
    if !(args.map_kpa.is_finite() && args.map_kpa >= 0.0) {
        return Err(arg_error("--map must be >= 0 kPa"));
    }
    if args.coolant_c.is_some_and(|c| !c.is_finite()) {
        return Err(arg_error("--coolant must be finite"));
    }
    if args.duration_ms == 0 {
        return Err(arg_error("--duration-ms must be >= 1"));
    }
    Ok(())
}

/// Build the scheduler from `cfg` on simulated hardware, spin the crank at a
/// constant speed and run the loop for the requested simulated time.
pub fn run_simulation(
    cfg: &ecu_config::Config,
    base_dir: &Path,
    args: SimArgs,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<SimReport> {
    let wheel: WheelCfg = (&cfg.wheel).into();
    check_args(&args, &wheel)?;
    let fuel: FuelCfg = (&cfg.fuel).into();
    let spark: SparkCfg = (&cfg.spark).into();
    let sched: SchedulerCfg = (&cfg.scheduler).into();
    let sensors: SensorCfg = (&cfg.sensors).into();
    let tables = ecu_core::conversions::load_tables(&cfg.tables, base_dir)?;

    if SamplingMode::from(&cfg.scheduler) != SamplingMode::Direct {
        tracing::info!("simulation reads MAP inside the loop; scheduler.mode = sampler is ignored");
    }

    let rig = SimRig::new();
    rig.set_channel(&sensors.map, args.map_kpa);
    match (sensors.coolant, args.coolant_c) {
        (Some(ch), c) => rig.set_channel(&ch, c.unwrap_or(DEFAULT_COOLANT_C)),
        (None, Some(_)) => tracing::warn!("--coolant ignored: sensors.coolant_channel is not set"),
        (None, None) => {}
    }

    let mut scheduler = rig
        .builder()
        .with_wheel(wheel)
        .with_fuel(fuel)
        .with_spark(spark)
        .with_scheduler(sched)
        .with_sensors(sensors)
        .with_tables(tables)
        .build()?;
    rig.attach(
        &scheduler,
        CrankWheel::new(wheel.teeth, args.rpm, 0, rig.now_us() + CRANK_START_US),
    );

    let max_steps = (args.duration_ms * 1_000 / sched.loop_period_us).max(1);
    tracing::info!(
        rpm = args.rpm,
        map_kpa = args.map_kpa,
        max_steps,
        "simulation start"
    );
    let result = run(
        &mut scheduler,
        RunOptions {
            mode: SamplingMode::Direct,
            max_steps: Some(max_steps),
            shutdown: Some(shutdown),
        },
    );
    rig.detach();
    let summary = result?;

    // Outputs still on at the end were cut short by the final suppress.
    let stop_us = rig.now_us();
    let complete = |pulses: Vec<(u64, u64)>| -> Vec<(u64, u64)> {
        pulses.into_iter().filter(|(_, off)| *off < stop_us).collect()
    };
    Ok(SimReport {
        summary,
        simulated_us: stop_us,
        last_plan: scheduler.last_plan(),
        injector: PulseStats::from_pulses(&complete(rig.injector.pulses())),
        dwell: PulseStats::from_pulses(&complete(rig.coil.pulses())),
    })
}

pub fn report_json(r: &SimReport, stats: bool) -> serde_json::Value {
    let s = &r.summary;
    let mut obj = json!({
        "steps": s.steps,
        "simulated_ms": r.simulated_us as f64 / 1_000.0,
        "rpm": s.rpm,
        "plans": s.plans,
        "unsynced_steps": s.unsynced_steps,
        "sync_losses": s.sync_losses,
        "fuel": {
            "pulses": s.injection.pulses,
            "missed_opens": s.injection.missed_opens,
        },
        "spark": {
            "sparks": s.spark.sparks,
            "late_sparks": s.spark.late_sparks,
            "missed_sparks": s.spark.missed_sparks,
            "max_error_us": s.spark.max_error_us,
        },
        "last_plan": r.last_plan.map(|(fuel, spark, detail)| json!({
            "advance_deg": detail.advance_deg,
            "ve": detail.ve,
            "fuel_start_deg": fuel.start_angle_deg,
            "fuel_end_deg": fuel.end_angle_deg,
            "fuel_duration_us": fuel.duration_us,
            "charge_start_deg": spark.charge_start_angle_deg,
            "spark_deg": spark.spark_angle_deg,
            "dwell_us": spark.dwell_us,
        })),
    });
    if stats {
        obj["stats"] = json!({
            "injector_pulse": r.injector.map(PulseStats::to_json),
            "dwell": r.dwell.map(PulseStats::to_json),
        });
    }
    obj
}

pub fn print_report(r: &SimReport, json: bool, stats: bool) {
    if json {
        println!("{}", report_json(r, stats));
        return;
    }
    let s = &r.summary;
    println!(
        "simulation complete: {} steps over {:.1} ms",
        s.steps,
        r.simulated_us as f64 / 1_000.0
    );
    println!(
        "  engine: {:.0} rpm, {} plans, {} unsynced steps, {} sync losses",
        s.rpm, s.plans, s.unsynced_steps, s.sync_losses
    );
    println!(
        "  fuel:   {} pulses, {} missed opens",
        s.injection.pulses, s.injection.missed_opens
    );
    println!(
        "  spark:  {} sparks, {} late, {} missed, max error {} us",
        s.spark.sparks, s.spark.late_sparks, s.spark.missed_sparks, s.spark.max_error_us
    );
    if let Some((fuel, spark, detail)) = r.last_plan {
        println!(
            "  plan:   advance {:.1} deg, VE {:.3}, injector {:.1}..{:.1} deg ({} us), spark {:.1} deg",
            detail.advance_deg,
            detail.ve,
            fuel.start_angle_deg,
            fuel.end_angle_deg,
            fuel.duration_us,
            spark.spark_angle_deg
        );
    }
    if stats {
        print_pulse_stats("injector pulse", r.injector);
        print_pulse_stats("dwell", r.dwell);
    }
}

fn print_pulse_stats(label: &str, stats: Option<PulseStats>) {
    match stats {
        Some(p) => println!(
            "  {label}: n={} min={} us mean={:.1} us max={} us",
            p.count, p.min_us, p.mean_us, p.max_us
        ),
        None => println!("  {label}: none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[wheel]
teeth = 36
angle_per_tooth_deg = 10.0
tdc_deg = 360.0

[sensors]
map_channel = 0
map_kpa_per_count = 0.05
"#;

    fn sim(args: SimArgs) -> CoreResult<SimReport> {
        let cfg = ecu_config::load_toml(CONFIG).unwrap();
        run_simulation(&cfg, Path::new("."), args, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn steady_state_pulses_match_plan() {
        let r = sim(SimArgs {
            rpm: 3000.0,
            map_kpa: 60.0,
            coolant_c: None,
            duration_ms: 200,
        })
        .unwrap();
        assert_eq!(r.summary.steps, 2_000);
        assert!(r.summary.spark.sparks >= 8);
        assert_eq!(r.summary.spark.late_sparks, 0);
        let (_, _, detail) = r.last_plan.unwrap();
        assert!((detail.advance_deg - 20.0).abs() < 0.01);
        // 600 dead time + 6000 * 0.75 * 0.6
        let inj = r.injector.unwrap();
        assert!(inj.min_us.abs_diff(3_300) <= 2 && inj.max_us.abs_diff(3_300) <= 2);
        let dwell = r.dwell.unwrap();
        assert!(dwell.mean_us > 2_990.0 && dwell.mean_us < 3_010.0);

        let v = report_json(&r, true);
        assert_eq!(v["steps"], 2_000);
        assert!(v["stats"]["dwell"]["count"].as_u64().unwrap() >= 8);
    }

    #[test]
    fn bad_rpm_is_a_config_error() {
        let err = sim(SimArgs {
            rpm: 0.0,
            map_kpa: 60.0,
            coolant_c: None,
            duration_ms: 10,
        })
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<EcuError>(), Some(EcuError::Config(m)) if m.contains("--rpm")));
    }

    #[test]
    fn rpm_above_wheel_limit_is_rejected() {
        // 36-1 wheel with a 100 us gap tolerance tops out at 8333 rpm
        let err = sim(SimArgs {
            rpm: 18_000.0,
            map_kpa: 60.0,
            coolant_c: None,
            duration_ms: 10,
        })
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<EcuError>(), Some(EcuError::Config(m)) if m.contains("(0, 8333]")));
    }

    #[test]
    fn pulse_stats_summarize_widths() {
        let p = PulseStats::from_pulses(&[(0, 10), (100, 130), (200, 220)]).unwrap();
        assert_eq!((p.count, p.min_us, p.max_us), (3, 10, 30));
        assert!((p.mean_us - 20.0).abs() < 1e-9);
        assert!(PulseStats::from_pulses(&[]).is_none());
    }
}
