//! tpreco: trigger-primitive clustering and cross-plane matching.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use thiserror::Error;
use tpreco_algorithms::PipelineConfig;
use tpreco_core::tp::View;
use tpreco_io::{process_files, read_tps, BatchConfig, InputSummary, OutputOptions};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    TpIo(#[from] tpreco_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tpreco_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} file(s) failed")]
    FilesFailed { failed: usize, total: usize },
}

/// Trigger-primitive clustering and X/U/V matching.
#[derive(Parser)]
#[command(name = "tpreco")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster, select and match the TPs of one or more files
    Process {
        /// Input JSON-lines TP file(s)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        overrides: ConfigArgs,

        #[command(flatten)]
        outputs: OutputArgs,

        /// Files processed concurrently (default: available cores)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Show TP counts of a file per event and plane
    Info {
        /// Input JSON-lines TP file
        input: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        overrides: ConfigArgs,
    },
}

/// Configuration file plus per-parameter overrides.
#[derive(clap::Args)]
struct ConfigArgs {
    /// Pipeline configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Clustering time gap limit (TPC ticks)
    #[arg(long)]
    tick_limit: Option<u32>,

    /// Clustering channel distance limit
    #[arg(long)]
    channel_limit: Option<u32>,

    /// Minimum TPs for a cluster to be emitted
    #[arg(long)]
    min_tps: Option<usize>,

    /// Matching time tolerance (TPC ticks)
    #[arg(long)]
    time_tolerance: Option<u32>,

    /// Energy cut (MeV), replaces the ADC integral cuts
    #[arg(long)]
    energy_cut: Option<f64>,
}

/// Optional output formats.
#[derive(clap::Args)]
struct OutputArgs {
    /// Also write kept clusters to <stem>_clusters.h5
    #[cfg(feature = "hdf5")]
    #[arg(long)]
    hdf5: bool,
}

impl OutputArgs {
    #[cfg_attr(not(feature = "hdf5"), allow(clippy::unused_self))]
    fn options(&self) -> OutputOptions {
        OutputOptions {
            #[cfg(feature = "hdf5")]
            hdf5: self.hdf5,
        }
    }
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(ticks) = self.tick_limit {
            config.clustering = config.clustering.with_tick_limit(ticks);
        }
        if let Some(channels) = self.channel_limit {
            config.clustering = config.clustering.with_channel_limit(channels);
        }
        if let Some(size) = self.min_tps {
            config.clustering = config.clustering.with_min_tps_to_cluster(size);
        }
        if let Some(ticks) = self.time_tolerance {
            config.matching = config.matching.with_time_tolerance_ticks(ticks);
        }
        if let Some(mev) = self.energy_cut {
            config.cuts.energy_cut = Some(mev);
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn run_process(
    inputs: &[PathBuf],
    output: &Path,
    overrides: &ConfigArgs,
    outputs: &OutputArgs,
    threads: Option<usize>,
) -> Result<()> {
    let config = overrides.resolve()?;
    debug!("effective configuration: {:?}", config);

    let mut batch = BatchConfig::default().with_outputs(outputs.options());
    if let Some(threads) = threads {
        batch = batch.with_parallelism(threads);
    }

    let start = Instant::now();
    let report = process_files(inputs, output, &config, &batch)?;
    let elapsed = start.elapsed();

    info!(
        "processed {} file(s) on {} thread(s) in {:.2} s",
        report.succeeded(),
        report.threads,
        elapsed.as_secs_f64()
    );
    for failure in report.failures() {
        if let Err(e) = &failure.result {
            error!("{}: {}", failure.input.display(), e);
        }
    }

    let stats = &report.statistics;
    println!("Events:            {}", stats.events);
    println!(
        "Clusters:          {} kept, {} discarded",
        stats.kept_clusters, stats.discarded_clusters
    );
    if stats.abandoned_planes > 0 {
        println!("Abandoned planes:  {}", stats.abandoned_planes);
    }
    print!("{}", report.diagnostics);

    let failed = report.failures().count();
    if failed > 0 {
        return Err(CliError::FilesFailed {
            failed,
            total: report.files.len(),
        });
    }
    Ok(())
}

fn run_info(input: &Path, json: bool) -> Result<()> {
    let store = read_tps(input)?;
    let summary = InputSummary::from_store(&store);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    println!("TPs: {}", summary.tps);
    if let (Some(first), Some(last)) = (summary.first_time, summary.last_time) {
        println!("Time range (TDC): {} - {}", first, last);
    }
    println!(
        "Per view: U={} V={} X={}",
        summary.view_total(View::U),
        summary.view_total(View::V),
        summary.view_total(View::X)
    );

    println!("\n{:>10} {:>8} {:>8} {:>8}", "event", "U", "V", "X");
    println!("{:-<37}", "");
    for (event, counts) in &summary.per_event {
        println!(
            "{:>10} {:>8} {:>8} {:>8}",
            event, counts[0], counts[1], counts[2]
        );
    }

    println!("\nGenerators:");
    for (name, count) in &summary.generators {
        println!(
            "  {:<20} {:>8} ({:.1}%)",
            name,
            count,
            100.0 * *count as f64 / summary.tps.max(1) as f64
        );
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Process {
            inputs,
            output,
            overrides,
            outputs,
            threads,
        } => run_process(&inputs, &output, &overrides, &outputs, threads),
        Commands::Info { input, json } => run_info(&input, json),
        Commands::Config { overrides } => {
            println!("{}", overrides.resolve()?.to_json_pretty()?);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
