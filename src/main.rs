//! CLI entry point for rust_scan.
//!
//! Runs sweeps against the simulated bench described in the configuration:
//!
//! ```bash
//! rust_scan run --config config/scan.toml
//! rust_scan run --continuous
//! rust_scan table config/positions.csv
//! rust_scan describe
//! ```
//!
//! Ctrl-C stops a running sweep; the partial run is discarded.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_scan::bench::MockBench;
use rust_scan::config::{AppConfig, DEFAULT_CONFIG_PATH};
use rust_scan::logging::{self, OutputFormat, TracingConfig};
use scan_core::{DataSet, Observable, ObserverGuard, ScanResult};
use scan_driver_mock::AcquisitionMode;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust_scan")]
#[command(about = "Manipulator sweeps against simulated hardware", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the manipulator over the configured range
    Run {
        /// Collect on hardware triggers during a single move
        #[arg(long)]
        continuous: bool,
    },

    /// Visit the positions listed in a table file
    Table {
        /// Table file; defaults to `table.path` from the configuration
        file: Option<PathBuf>,
    },

    /// Print the bench components as JSON
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    // The mock source collects on triggers only for continuous sweeps
    match &cli.command {
        Commands::Run { continuous } => {
            config.scan.continuous_scan |= *continuous;
            config.mock.data_source.acquisition = if config.scan.continuous_scan {
                AcquisitionMode::Triggered
            } else {
                AcquisitionMode::Scalar
            };
        }
        Commands::Table { .. } => config.mock.data_source.acquisition = AcquisitionMode::Scalar,
        Commands::Describe => {}
    }
    config.validate()?;

    logging::init(TracingConfig::from_app_config(&config)?.with_format(cli.log_format))?;
    info!(name = %config.application.name, "configuration loaded");

    let bench = MockBench::from_config(&config);

    match cli.command {
        Commands::Run { .. } => {
            let scan = bench.scan(&config);
            let _progress = log_progress(scan.progress());
            let data = until_interrupted(scan.read_data_set(), || scan.stop()).await?;
            if let Some(retract) = scan.take_retract_task() {
                retract.await??;
            }
            print_summary(&data);
        }
        Commands::Table { file } => {
            let scan = bench.tabular_scan(&config, file.as_deref())?;
            let _progress = log_progress(scan.progress());
            let _labels = scan
                .current_entry_label()
                .observe(|label: &String| info!(entry = %label, "visiting table entry"));
            let data = until_interrupted(scan.read_data_set(), || scan.stop()).await?;
            if let Some(retract) = scan.take_retract_task() {
                retract.await??;
            }
            print_summary(&data);
        }
        Commands::Describe => {
            let descriptions = bench.descriptions(&config);
            println!("{}", serde_json::to_string_pretty(&descriptions)?);
        }
    }

    Ok(())
}

/// Drive `sweep` to completion, calling `stop` on Ctrl-C and then waiting
/// for the sweep to wind down.
async fn until_interrupted<F>(sweep: F, stop: impl Fn()) -> ScanResult<DataSet>
where
    F: Future<Output = ScanResult<DataSet>>,
{
    tokio::pin!(sweep);
    tokio::select! {
        result = &mut sweep => result,
        _ = signal::ctrl_c() => {
            warn!("interrupted, stopping sweep");
            stop();
            sweep.await
        }
    }
}

fn log_progress(progress: &Observable<f64>) -> ObserverGuard {
    let last_decile = AtomicU32::new(0);
    progress.observe(move |value: &f64| {
        let decile = (value * 10.0).floor() as u32;
        if last_decile.swap(decile, Ordering::Relaxed) != decile {
            info!(percent = (value * 100.0).round(), "sweep progress");
        }
    })
}

fn print_summary(data: &DataSet) {
    println!("shape: {:?}", data.shape());
    for axis in data.axes() {
        println!(
            "axis {:>8} [{}]: {:?}",
            axis.name(),
            axis.unit(),
            axis.values()
        );
    }
    println!("data [{}]:\n{}", data.unit(), data.data());
}
