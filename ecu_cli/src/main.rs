#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod lookup;
mod rt;
mod self_check;
mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use ecu_core::error::{EcuError, Report};
use eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(err) = real_main(cli) {
        tracing::debug!(error = %format!("{err:#}"), "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    if !cli.json {
        color_eyre::install()?;
    }

    let cfg = load_config(&cli.config)?;
    // Flushes the file appender when dropped
    let _log_guard = init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    let base_dir = config_dir(&cli.config);
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Simulate {
            rpm,
            map,
            coolant,
            duration_ms,
            stats,
            realtime,
        } => {
            rt::setup_rt_once(realtime);
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .wrap_err("install Ctrl-C handler")?;
            let report = simulate::run_simulation(
                &cfg,
                &base_dir,
                simulate::SimArgs {
                    rpm,
                    map_kpa: map,
                    coolant_c: coolant,
                    duration_ms,
                },
                shutdown,
            )?;
            simulate::print_report(&report, cli.json, stats);
        }
        Commands::Lookup {
            table,
            rpm,
            map,
            coolant,
        } => {
            let r = lookup::lookup(&cfg, &base_dir, table, rpm, map, coolant)?;
            lookup::print_lookup(&r, cli.json);
        }
        Commands::SelfCheck => {
            let r = self_check::self_check(&cfg, &base_dir)?;
            self_check::print_self_check(&r, cli.json);
        }
    }
    Ok(())
}

/// Read, parse and validate the TOML config. Every failure past reading the
/// file is an `EcuError::Config`.
fn load_config(path: &Path) -> Result<ecu_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = ecu_config::load_toml(&text)
        .map_err(|e| Report::new(EcuError::Config(e.message().to_string())))
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .map_err(|e| Report::new(EcuError::Config(e.to_string())))?;
    Ok(cfg)
}

/// Table CSV paths in the config are relative to the config file itself.
fn config_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Console logs go to stderr so stdout stays machine-readable; the optional
/// `[logging].file` gets JSON lines through a non-blocking appender.
fn init_tracing(
    json: bool,
    cli_level: Option<&str>,
    logging: &ecu_config::Logging,
) -> Result<Option<WorkerGuard>> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(logging.level.as_deref().unwrap_or("info")))?,
    };

    let mut guard = None;
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(fmt::layer().with_writer(std::io::stderr).boxed());
    }

    if let Some(file) = logging.file.as_deref() {
        use tracing_appender::rolling::{RollingFileAppender, Rotation};

        let path = Path::new(file);
        let dir = config_dir(path);
        let prefix = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?
            .to_string_lossy()
            .into_owned();
        let rotation = match logging.rotation.as_deref().map(str::to_ascii_lowercase) {
            Some(r) if r == "daily" => Rotation::DAILY,
            Some(r) if r == "hourly" => Rotation::HOURLY,
            _ => Rotation::NEVER,
        };
        let appender = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(prefix)
            .build(&dir)
            .wrap_err_with(|| format!("open log file {file}"))?;
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    Ok(guard)
}
