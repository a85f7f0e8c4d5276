//! Human-readable error descriptions and structured JSON error formatting.

use ecu_core::error::{BuildError, EcuError, TableError, TimingFault};

fn explain(what: &str, causes: &str, fix: &str) -> String {
    format!("What happened: {what}.\nLikely causes: {causes}.\nHow to fix: {fix}.")
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => explain(
                "No MAP sensor was provided to the scheduler",
                "The ADC failed to initialize or was not passed to the builder",
                "Make sure the ADC is created and passed via with_sensor(...)",
            ),
            BuildError::MissingInjector => explain(
                "No injector output was provided to the scheduler",
                "The injector line or its compare timer was not wired into the builder",
                "Pass both via with_injector(...)",
            ),
            BuildError::MissingCoil => explain(
                "No ignition coil output was provided to the scheduler",
                "The coil line or its compare timer was not wired into the builder",
                "Pass both via with_coil(...)",
            ),
            BuildError::MissingTables => explain(
                "No calibration tables were configured",
                "Neither with_tables(...) nor with_default_tables() was called",
                "Load tables from [tables] or use the firmware defaults",
            ),
            BuildError::InvalidConfig(msg) => explain(
                &format!("Invalid configuration ({msg})"),
                "Out-of-range or inconsistent values in the TOML",
                "Edit the config file, then rerun `ecu self-check`",
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TableError>() {
        return explain(
            &format!("Calibration table rejected: {te}"),
            "A table CSV with a bad axis or an incomplete grid",
            "Fix the CSV named in [tables]; axes must be strictly increasing",
        );
    }

    if let Some(de) = err.downcast_ref::<EcuError>() {
        return match de {
            EcuError::Timing(fault) => {
                let (what, causes) = match fault {
                    TimingFault::FuelCloseMissed => (
                        "The injector close interrupt never fired; the injector was forced shut",
                        "A stuck compare timer, or the main loop starved for longer than scheduler.max_timer_overrun_us",
                    ),
                    TimingFault::FuelOpenWhileOpen => (
                        "An injector open was requested while the injector was already open",
                        "Overlapping fuel plans: the pulse is longer than one engine cycle",
                    ),
                    TimingFault::SparkDischargeMissed => (
                        "The spark discharge interrupt never fired; the coil was forced off",
                        "A stuck compare timer, or the main loop starved for longer than scheduler.max_timer_overrun_us",
                    ),
                };
                explain(
                    what,
                    causes,
                    "Check timer wiring, lower the load on the loop, or raise scheduler.max_timer_overrun_us",
                )
            }
            EcuError::Hardware(msg) if msg.contains("timeout") => explain(
                "The ADC did not answer within its timeout",
                "Wrong SPI bus or chip select, wiring or power issues",
                "Check [pins] adc_bus/adc_slave and the ADC supply",
            ),
            EcuError::Hardware(msg) | EcuError::HardwareFault(msg) => explain(
                &format!("Hardware error ({msg})"),
                "Wiring, power, or insufficient GPIO/SPI permissions",
                "Verify [pins] and run with --log-level=debug for details",
            ),
            EcuError::Config(msg) => explain(
                &format!("Invalid configuration ({msg})"),
                "Missing sections ([wheel], [sensors]) or out-of-range values",
                "Edit the TOML config and try again; see etc/ecu_config.toml",
            ),
            EcuError::Table(msg) => explain(
                &format!("Calibration table rejected ({msg})"),
                "A table CSV with a bad axis or an incomplete grid",
                "Fix the CSV named in [tables]",
            ),
            EcuError::SyncLost => explain(
                "Crank position sync was lost",
                "Missing or noisy trigger edges, or the engine stopped",
                "Check the crank sensor and wheel.tooth_tolerance_us",
            ),
            EcuError::State(msg) => explain(
                &format!("Invalid controller state ({msg})"),
                "An internal sequencing problem",
                "Re-run with --log-level=debug and report the log",
            ),
        };
    }

    // String-based heuristics for errors from config and CSV loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("table csv must have headers") {
        return "Invalid headers in table CSV. Expected 'rpm,map,value' or 'rpm,map,clt,value'."
            .to_string();
    }
    if lower.contains("table grid incomplete") || lower.contains("duplicate grid point") {
        return explain(
            &format!("Table CSV grid is not complete ({msg})"),
            "A missing or repeated (rpm, map[, clt]) combination",
            "List every axis combination exactly once",
        );
    }
    if lower.contains("read config") {
        return explain(
            &format!("Could not read the config file ({msg})"),
            "Wrong --config path or missing permissions",
            "Pass --config <FILE> pointing at a readable TOML file",
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Short stable reason tag for JSON output.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    if err.downcast_ref::<TableError>().is_some() {
        return "Table";
    }
    match err.downcast_ref::<EcuError>() {
        Some(EcuError::Config(_)) => "Config",
        Some(EcuError::Table(_)) => "Table",
        Some(EcuError::Hardware(_)) => "Hardware",
        Some(EcuError::HardwareFault(_)) => "HardwareFault",
        Some(EcuError::Timing(TimingFault::FuelCloseMissed)) => "FuelCloseMissed",
        Some(EcuError::Timing(TimingFault::FuelOpenWhileOpen)) => "FuelOpenWhileOpen",
        Some(EcuError::Timing(TimingFault::SparkDischargeMissed)) => "SparkDischargeMissed",
        Some(EcuError::SyncLost) => "SyncLost",
        Some(EcuError::State(_)) => "State",
        None => "Error",
    }
}

/// Stable exit codes per error kind; 2 is left to clap for usage errors.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(_) => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<TableError>().is_some() {
        return 4;
    }
    match err.downcast_ref::<EcuError>() {
        Some(EcuError::Config(_)) => 3,
        Some(EcuError::Table(_)) => 4,
        Some(EcuError::Hardware(_) | EcuError::HardwareFault(_)) => 5,
        Some(EcuError::Timing(_)) => 6,
        Some(EcuError::SyncLost) => 7,
        Some(EcuError::State(_)) | None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
    let obj = if chain.is_empty() {
        json!({ "reason": reason_name(err), "message": humanize(err) })
    } else {
        json!({ "reason": reason_name(err), "message": humanize(err), "details": chain })
    };
    obj.to_string()
}
