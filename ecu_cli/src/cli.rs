//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ecu", version, about = "Engine control core CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/ecu_config.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON; logs become JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides RUST_LOG and [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    /// Linux locks future pages too; elsewhere only what is resident.
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::All
        } else {
            RtLock::Current
        }
    }
}

/// Calibration table selector for `lookup`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableKind {
    /// Volumetric efficiency (fraction)
    Ve,
    /// Spark advance (degrees before TDC)
    Spark,
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Ve => "ve",
            TableKind::Spark => "spark",
        }
    }
}

/// Real-time knobs shared by loop-running commands.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, memory lock, CPU pinning)
    #[arg(long, action = ArgAction::SetTrue)]
    pub rt: bool,

    /// SCHED_FIFO priority; clamped to the system range (default: max)
    #[arg(long = "rt-prio", value_name = "PRIO", requires = "rt")]
    pub rt_prio: Option<i32>,

    /// Memory locking mode
    #[arg(long = "rt-lock", value_enum, value_name = "MODE", requires = "rt")]
    pub rt_lock: Option<RtLock>,

    /// CPU index to pin the process to (default: 0)
    #[arg(long = "rt-cpu", value_name = "CPU", requires = "rt")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine loop against a simulated crank wheel, ADC and timers
    #[command(
        long_about = "Run the scheduler against simulated hardware in simulated time.\n\
Crank edges and compare-timer interrupts are delivered in time order while the\n\
main loop steps at scheduler.loop_period_us. MAP is read in the loop (direct\n\
mode) regardless of scheduler.mode, since simulated time cannot drive a\n\
background sampler thread.",
        after_long_help = "Examples:\n  ecu simulate --rpm 3000 --map 60\n  ecu --json simulate --rpm 6500 --map 100 --duration-ms 500 --stats"
    )]
    Simulate {
        /// Engine speed in revolutions per minute
        #[arg(long, default_value_t = 3000.0)]
        rpm: f32,

        /// Manifold pressure in kPa
        #[arg(long, default_value_t = 60.0)]
        map: f32,

        /// Coolant temperature in degrees C (only used when sensors.coolant_channel is set)
        #[arg(long)]
        coolant: Option<f32>,

        /// Simulated run time
        #[arg(long = "duration-ms", value_name = "MS", default_value_t = 1000)]
        duration_ms: u64,

        /// Print pulse width and dwell statistics
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,

        #[command(flatten)]
        realtime: RtArgs,
    },

    /// Interpolate a calibration table at one operating point
    Lookup {
        #[arg(long, value_enum)]
        table: TableKind,

        #[arg(long)]
        rpm: f32,

        /// Manifold pressure in kPa
        #[arg(long)]
        map: f32,

        /// Coolant temperature in degrees C (3D VE tables)
        #[arg(long)]
        coolant: Option<f32>,
    },

    /// Validate config and tables, build the scheduler, probe the ADC when built with hardware
    SelfCheck,
}
