//! Multi-file batch driver.
//!
//! Files are independent, so they run concurrently on a bounded rayon
//! pool. The number of files in flight is capped by the memory budget.

use crate::reader::read_tps;
#[cfg(feature = "hdf5")]
use crate::hdf5::ClusterWriteOptions;
#[cfg(feature = "hdf5")]
use crate::records::ClusterRecord;
#[cfg(feature = "hdf5")]
use crate::writer::write_clusters_hdf5_atomic;
use crate::writer::{write_json_atomic, write_reconstruction, OutputPaths};
use crate::{Error, Result};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tpreco_algorithms::{reconstruct_file, MatchDiagnostics, PipelineConfig, PipelineStatistics};

/// In-memory size of a loaded file relative to its size on disk.
const MEMORY_OVERHEAD: u64 = 4;

/// Optional outputs written next to the JSON-lines files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Also write the kept clusters of every plane to `<stem>_clusters.h5`.
    #[cfg(feature = "hdf5")]
    pub hdf5: bool,
}

/// Batch driver settings.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchConfig {
    /// Upper bound on concurrent files (None = available cores).
    pub parallelism: Option<usize>,
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
    /// Optional outputs per file.
    pub outputs: OutputOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            memory_fraction: 0.5,
            memory_budget_bytes: None,
            outputs: OutputOptions::default(),
        }
    }
}

impl BatchConfig {
    /// Set the concurrent file limit.
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Set the optional outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: OutputOptions) -> Self {
        self.outputs = outputs;
        self
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidFormat(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidFormat(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    /// Number of files to process at once.
    ///
    /// Bounded by `parallelism` (or the core count) and by how many copies
    /// of the largest file fit in the memory budget; never below one.
    ///
    /// # Errors
    /// Returns an error if the memory budget cannot be resolved.
    pub fn resolve_parallelism(&self, file_sizes: &[u64]) -> Result<usize> {
        let cap = self
            .parallelism
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
            .max(1);
        let largest = file_sizes.iter().copied().max().unwrap_or(0);
        if largest == 0 {
            return Ok(cap);
        }
        let budget = self.resolve_budget_bytes()? as u64;
        let fit = budget / largest.saturating_mul(MEMORY_OVERHEAD);
        Ok(cap.min(usize::try_from(fit).unwrap_or(usize::MAX)).max(1))
    }
}

/// Summary of one processed file, also written as its diagnostics file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    /// Input path.
    pub input: PathBuf,
    /// TPs read.
    pub tps: usize,
    /// Emitted matches.
    pub matches: usize,
    /// Records written over all output files.
    pub records_written: usize,
    /// Pipeline counters.
    pub statistics: PipelineStatistics,
    /// Matcher counters.
    pub diagnostics: MatchDiagnostics,
}

/// Reads, reconstructs and writes one file.
///
/// # Errors
/// Returns an error if the input cannot be read or an output cannot be written.
pub fn process_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_dir: Q,
    config: &PipelineConfig,
) -> Result<FileReport> {
    process_file_with(input, output_dir, config, &OutputOptions::default())
}

/// [`process_file`] plus the optional outputs.
///
/// # Errors
/// Returns an error if the input cannot be read or an output cannot be written.
pub fn process_file_with<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_dir: Q,
    config: &PipelineConfig,
    outputs: &OutputOptions,
) -> Result<FileReport> {
    let input = input.as_ref();
    let mut store = read_tps(input)?;
    let reconstruction = reconstruct_file(&store, config)?;
    let joined = reconstruction.join_matches(&mut store)?;

    let paths = OutputPaths::for_input(input, output_dir);
    let records_written = write_reconstruction(&paths, &reconstruction, &joined, &store)?;
    #[cfg(feature = "hdf5")]
    if outputs.hdf5 {
        let kept = reconstruction
            .planes()
            .iter()
            .flat_map(|plane| &plane.kept)
            .map(|c| ClusterRecord::from_cluster(c, &store))
            .collect::<Result<Vec<_>>>()?;
        write_clusters_hdf5_atomic(paths.hdf5(), &kept, &ClusterWriteOptions::default())?;
    }
    #[cfg(not(feature = "hdf5"))]
    let _ = outputs;

    let report = FileReport {
        input: input.to_path_buf(),
        tps: store.len(),
        matches: joined.len(),
        records_written,
        statistics: *reconstruction.statistics(),
        diagnostics: reconstruction.diagnostics().clone(),
    };
    write_json_atomic(paths.diagnostics(), &report)?;

    info!(
        "{}: {} TPs, {} clusters, {} matches",
        input.display(),
        report.tps,
        report.statistics.kept_clusters + report.statistics.discarded_clusters,
        report.matches
    );
    Ok(report)
}

/// Result for one input of a batch.
#[derive(Debug)]
pub struct FileOutcome {
    /// Input path.
    pub input: PathBuf,
    /// Report, or the error that stopped the file.
    pub result: Result<FileReport>,
}

/// Result of a whole batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-file outcomes in input order.
    pub files: Vec<FileOutcome>,
    /// Files processed concurrently.
    pub threads: usize,
    /// Pipeline counters merged over successful files.
    pub statistics: PipelineStatistics,
    /// Matcher counters merged over successful files.
    pub diagnostics: MatchDiagnostics,
}

impl BatchReport {
    /// Files that failed.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.result.is_err())
    }

    /// Number of successful files.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_ok()).count()
    }

    /// Returns true when every file succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Processes many files on a bounded pool.
///
/// A failing file does not stop the others; its error is kept in the
/// report and the outputs of other files stay intact.
///
/// # Errors
/// Returns an error only for an invalid configuration or pool setup.
pub fn process_files<Q: AsRef<Path> + Sync>(
    inputs: &[PathBuf],
    output_dir: Q,
    config: &PipelineConfig,
    batch: &BatchConfig,
) -> Result<BatchReport> {
    config.validate()?;
    fs::create_dir_all(output_dir.as_ref())?;

    let sizes: Vec<u64> = inputs
        .iter()
        .map(|p| fs::metadata(p).map_or(0, |m| m.len()))
        .collect();
    let threads = batch.resolve_parallelism(&sizes)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::ThreadPool(e.to_string()))?;

    let output_dir = output_dir.as_ref();
    let files: Vec<FileOutcome> = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| FileOutcome {
                input: input.clone(),
                result: process_file_with(input, output_dir, config, &batch.outputs),
            })
            .collect()
    });

    let mut report = BatchReport {
        threads,
        ..BatchReport::default()
    };
    for outcome in &files {
        match &outcome.result {
            Ok(file) => {
                report.statistics.merge(&file.statistics);
                report.diagnostics.merge(&file.diagnostics);
            }
            Err(e) => warn!("{}: failed: {e}", outcome.input.display()),
        }
    }
    report.files = files;
    Ok(report)
}
