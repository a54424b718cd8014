//! tpreco-io: TP ingestion, record persistence and the batch driver.
//!
//! Inputs are memory-mapped JSON-lines files. Outputs are written
//! atomically through `tempfile`, one set of files per input.
//!

mod batch;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod reader;
pub mod records;
mod writer;

pub use batch::{
    process_file, process_file_with, process_files, BatchConfig, BatchReport, FileOutcome,
    FileReport, OutputOptions,
};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use self::hdf5::{read_clusters_hdf5, write_clusters_hdf5, ClusterWriteOptions, Hdf5ClusterSink};
pub use reader::{read_tps, InputSummary, MappedFileReader, TpFileReader};
pub use records::{ClusterRecord, MatchRecord, TpColumns};
pub use writer::{
    read_cluster_records, read_jsonl, read_match_records, write_json_atomic, write_jsonl_atomic,
    write_reconstruction, OutputPaths,
};
#[cfg(feature = "hdf5")]
pub use writer::write_clusters_hdf5_atomic;
