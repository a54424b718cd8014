//! Output writers.
//!
//! Every output file is written to a temporary file in its destination
//! directory and renamed into place, so a reader never sees a partial file.

use crate::records::{ClusterRecord, MatchRecord};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tpreco_algorithms::{FileReconstruction, JoinedCluster};
use tpreco_core::store::TpStore;
use tpreco_core::tp::View;

fn temp_in(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(NamedTempFile::new_in(dir)?)
}

/// Writes one JSON object per line, atomically.
///
/// # Errors
/// Returns an error if encoding, writing or the final rename fails.
pub fn write_jsonl_atomic<'a, T, I, P>(path: P, records: I) -> Result<usize>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let temp = temp_in(path)?;
    let mut writer = BufWriter::new(temp);
    let mut count = 0;
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    let temp = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(count)
}

/// Writes a pretty-printed JSON document, atomically.
///
/// # Errors
/// Returns an error if encoding, writing or the final rename fails.
pub fn write_json_atomic<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let temp = temp_in(path)?;
    let mut writer = BufWriter::new(temp);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    let temp = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}

/// Writes cluster records to an HDF5 file, atomically.
///
/// # Errors
/// Returns an error if HDF5 I/O or the final rename fails.
#[cfg(feature = "hdf5")]
pub fn write_clusters_hdf5_atomic<P: AsRef<Path>>(
    path: P,
    records: &[ClusterRecord],
    options: &crate::hdf5::ClusterWriteOptions,
) -> Result<()> {
    let path = path.as_ref();
    let temp = temp_in(path)?;
    crate::hdf5::write_clusters_hdf5(temp.path(), records, options)?;
    temp.persist(path)?;
    Ok(())
}

/// Reads a JSON-lines file of records.
///
/// # Errors
/// Returns [`Error::Parse`] with the 1-based line of the first bad record.
pub fn read_jsonl<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| Error::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Reads a cluster file back.
///
/// # Errors
/// Returns an error on unreadable files, bad lines or inconsistent records.
pub fn read_cluster_records<P: AsRef<Path>>(path: P) -> Result<Vec<ClusterRecord>> {
    let records: Vec<ClusterRecord> = read_jsonl(path)?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}

/// Reads a match file back.
///
/// # Errors
/// Returns an error on unreadable files or bad lines.
pub fn read_match_records<P: AsRef<Path>>(path: P) -> Result<Vec<MatchRecord>> {
    read_jsonl(path)
}

/// Output file names for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    dir: PathBuf,
    stem: String,
}

impl OutputPaths {
    /// Output names derived from the input file stem.
    #[must_use]
    pub fn for_input<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> Self {
        let stem = input
            .as_ref()
            .file_stem()
            .map_or_else(|| "tps".to_string(), |s| s.to_string_lossy().into_owned());
        Self {
            dir: output_dir.as_ref().to_path_buf(),
            stem,
        }
    }

    /// `<stem>_clusters_<view>.jsonl`
    #[must_use]
    pub fn clusters(&self, view: View) -> PathBuf {
        self.dir.join(format!("{}_clusters_{view}.jsonl", self.stem))
    }

    /// `<stem>_discarded_<view>.jsonl`
    #[must_use]
    pub fn discarded(&self, view: View) -> PathBuf {
        self.dir.join(format!("{}_discarded_{view}.jsonl", self.stem))
    }

    /// `<stem>_matches.jsonl`
    #[must_use]
    pub fn matches(&self) -> PathBuf {
        self.dir.join(format!("{}_matches.jsonl", self.stem))
    }

    /// `<stem>_clusters.h5`, kept clusters of every plane.
    #[must_use]
    pub fn hdf5(&self) -> PathBuf {
        self.dir.join(format!("{}_clusters.h5", self.stem))
    }

    /// `<stem>_diagnostics.json`
    #[must_use]
    pub fn diagnostics(&self) -> PathBuf {
        self.dir.join(format!("{}_diagnostics.json", self.stem))
    }

    /// Every file written for the input.
    #[must_use]
    pub fn all(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = View::ALL
            .iter()
            .flat_map(|&v| [self.clusters(v), self.discarded(v)])
            .collect();
        paths.push(self.matches());
        paths.push(self.diagnostics());
        paths
    }
}

/// Writes the cluster and match files of one reconstruction.
///
/// Returns the number of records written.
///
/// # Errors
/// Returns an error if a record cannot be built or a file cannot be written.
pub fn write_reconstruction(
    paths: &OutputPaths,
    reconstruction: &FileReconstruction,
    joined: &[JoinedCluster],
    store: &TpStore,
) -> Result<usize> {
    fs::create_dir_all(&paths.dir)?;
    let mut written = 0;
    for plane in reconstruction.planes() {
        let kept = plane
            .kept
            .iter()
            .map(|c| ClusterRecord::from_cluster(c, store))
            .collect::<Result<Vec<_>>>()?;
        written += write_jsonl_atomic(paths.clusters(plane.view), &kept)?;

        let discarded = plane
            .discarded
            .iter()
            .map(|c| ClusterRecord::from_cluster(c, store))
            .collect::<Result<Vec<_>>>()?;
        written += write_jsonl_atomic(paths.discarded(plane.view), &discarded)?;
    }

    let matches = joined
        .iter()
        .map(|j| MatchRecord::from_joined(j, store))
        .collect::<Result<Vec<_>>>()?;
    written += write_jsonl_atomic(paths.matches(), &matches)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        a: u32,
        b: f64,
    }

    #[test]
    fn test_jsonl_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let rows = vec![Row { a: 1, b: 0.1 }, Row { a: 2, b: 1.0 / 3.0 }];

        assert_eq!(write_jsonl_atomic(&path, &rows).unwrap(), 2);
        let back: Vec<Row> = read_jsonl(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_atomic_replace_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Row { a: 1, b: 2.0 }).unwrap();
        write_json_atomic(&path, &Row { a: 3, b: 4.0 }).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let back: Row = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, Row { a: 3, b: 4.0 });
    }

    #[test]
    fn test_read_jsonl_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"a\":1,\"b\":1.0}\n\n{\"a\":\"x\"}\n").unwrap();
        match read_jsonl::<Row, _>(&path) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::for_input("/data/run_17.jsonl", "/out");
        assert_eq!(paths.clusters(View::X), PathBuf::from("/out/run_17_clusters_X.jsonl"));
        assert_eq!(paths.discarded(View::U), PathBuf::from("/out/run_17_discarded_U.jsonl"));
        assert_eq!(paths.matches(), PathBuf::from("/out/run_17_matches.jsonl"));
        assert_eq!(paths.diagnostics(), PathBuf::from("/out/run_17_diagnostics.json"));
        assert_eq!(paths.all().len(), 8);
        assert_eq!(paths.hdf5(), PathBuf::from("/out/run_17_clusters.h5"));
    }
}
