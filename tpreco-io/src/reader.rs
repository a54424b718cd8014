//! Memory-mapped TP readers.
//!
//! Inputs are JSON-lines files, one TP object per line. Blank lines and
//! lines starting with `#` are skipped.

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tpreco_core::store::TpStore;
use tpreco_core::tp::{TriggerPrimitive, View};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory. Empty files are not mapped.
pub struct MappedFileReader {
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Some(mmap)
        };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path the reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blank, non-comment lines with their 1-based line numbers.
    pub fn records(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.as_bytes()
            .split(|&b| b == b'\n')
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_ascii()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with(b"#"))
    }
}

/// Reader producing a [`TpStore`] from a JSON-lines TP file.
pub struct TpFileReader {
    reader: MappedFileReader,
}

impl TpFileReader {
    /// Opens a TP file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: MappedFileReader::open(path)?,
        })
    }

    /// Returns the underlying mapped reader.
    #[must_use]
    pub fn inner(&self) -> &MappedFileReader {
        &self.reader
    }

    /// Parses every record in parallel and stores them in file order.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for the first malformed line.
    pub fn read_store(&self) -> Result<TpStore> {
        let records: Vec<(usize, &[u8])> = self.reader.records().collect();
        let parsed: Vec<std::result::Result<TriggerPrimitive, (usize, String)>> = records
            .par_iter()
            .map(|&(line, bytes)| {
                serde_json::from_slice::<TriggerPrimitive>(bytes).map_err(|e| (line, e.to_string()))
            })
            .collect();

        let mut store = TpStore::with_capacity(parsed.len());
        for result in parsed {
            match result {
                Ok(tp) => {
                    store.push(tp);
                }
                Err((line, message)) => {
                    return Err(Error::Parse {
                        path: self.reader.path().to_path_buf(),
                        line,
                        message,
                    });
                }
            }
        }
        Ok(store)
    }
}

/// Reads all TPs of a JSON-lines file.
///
/// # Errors
/// Returns an error if the file cannot be mapped or a line fails to parse.
pub fn read_tps<P: AsRef<Path>>(path: P) -> Result<TpStore> {
    TpFileReader::open(path)?.read_store()
}

/// Per-event, per-view overview of a TP file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    /// Total TPs.
    pub tps: usize,
    /// TP count per event, split U, V, X.
    pub per_event: BTreeMap<u32, [usize; 3]>,
    /// Earliest `time_start` (TDC).
    pub first_time: Option<u64>,
    /// Latest `time_start` (TDC).
    pub last_time: Option<u64>,
    /// TP count per truth generator.
    pub generators: BTreeMap<String, usize>,
}

impl InputSummary {
    /// Summarizes a store.
    #[must_use]
    pub fn from_store(store: &TpStore) -> Self {
        let mut summary = Self {
            tps: store.len(),
            ..Self::default()
        };
        for (_, tp) in store.iter() {
            summary.per_event.entry(tp.event).or_default()[tp.view.index()] += 1;
            summary.first_time = Some(summary.first_time.map_or(tp.time_start, |t| t.min(tp.time_start)));
            summary.last_time = Some(summary.last_time.map_or(tp.time_start, |t| t.max(tp.time_start)));
            *summary
                .generators
                .entry(tp.truth.generator_name.clone())
                .or_insert(0) += 1;
        }
        summary
    }

    /// TPs on one view over all events.
    #[must_use]
    pub fn view_total(&self, view: View) -> usize {
        self.per_event.values().map(|counts| counts[view.index()]).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tpreco_core::store::TpIndex;

    const LINE_X: &str = r#"{"event":1,"channel":1800,"detector_channel":1800,"detector":0,"view":"X","time_start":1000,"samples_over_threshold":5,"samples_to_peak":2,"adc_peak":40,"adc_integral":120,"simide_energy":0.4,"truth":{"generator_name":"marley","pdg":11,"process":"ES","neutrino_energy":12.5}}"#;
    const LINE_U: &str = r#"{"event":2,"channel":10,"detector_channel":10,"detector":0,"view":"U","time_start":900,"samples_over_threshold":3,"samples_to_peak":1,"adc_peak":20,"adc_integral":60}"#;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_tps_skips_blank_and_comments() {
        let file = write_file(&format!("# header\n{LINE_X}\n\n  \n{LINE_U}\n"));
        let store = read_tps(file.path()).unwrap();

        assert_eq!(store.len(), 2);
        let x = &store[TpIndex(0)];
        assert_eq!(x.view, View::X);
        assert_eq!(x.truth.generator_name, "marley");
        assert_eq!(x.truth.process, "ES");
        let u = &store[TpIndex(1)];
        assert_eq!(u.truth.generator_name, "UNKNOWN");
        assert_eq!(u.simide_energy, 0.0);
        assert_eq!(store.event_count(), 2);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let file = write_file(&format!("{LINE_X}\n# comment\n{{\"event\": 1}}\n"));
        match read_tps(file.path()) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_collection_plane_labelled_z() {
        let line_z = LINE_X.replace("\"view\":\"X\"", "\"view\":\"Z\"");
        let file = write_file(&format!("{line_z}\n{LINE_U}\n"));
        let store = read_tps(file.path()).unwrap();
        assert_eq!(store[TpIndex(0)].view, View::X);
        assert_eq!(InputSummary::from_store(&store).view_total(View::X), 1);
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let reader = TpFileReader::open(file.path()).unwrap();
        assert!(reader.inner().is_empty());
        assert!(reader.read_store().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_tps("/nonexistent/tps.jsonl"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_input_summary() {
        let file = write_file(&format!("{LINE_X}\n{LINE_U}\n{LINE_X}\n"));
        let summary = InputSummary::from_store(&read_tps(file.path()).unwrap());

        assert_eq!(summary.tps, 3);
        assert_eq!(summary.per_event[&1], [0, 0, 2]);
        assert_eq!(summary.per_event[&2], [1, 0, 0]);
        assert_eq!(summary.first_time, Some(900));
        assert_eq!(summary.last_time, Some(1000));
        assert_eq!(summary.generators["marley"], 2);
        assert_eq!(summary.view_total(View::X), 2);
    }
}
