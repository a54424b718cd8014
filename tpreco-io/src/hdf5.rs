//! HDF5 cluster output.
//!
//! Layout: one group per plane (`/clusters/U`, `/clusters/V`,
//! `/clusters/X`). Per-cluster values are 1D datasets of length N (3N for
//! vectors). Per-TP values are flattened over all clusters; `tp_index[i]`
//! is the first TP of cluster `i` and `n_tps[i]` its length.

use crate::records::{ClusterRecord, TpColumns};
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayView1};
use std::path::Path;
use std::str::FromStr;
use tpreco_core::tp::View;

const FORMAT_VERSION: &str = "0.1";

/// Dataset creation options.
#[derive(Clone, Debug)]
pub struct ClusterWriteOptions {
    pub chunk_rows: usize,
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for ClusterWriteOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 4_096,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// Streaming writer for cluster records.
pub struct Hdf5ClusterSink {
    _file: File,
    planes: [PlaneWriter; 3],
}

impl Hdf5ClusterSink {
    /// Create a new sink.
    ///
    /// # Errors
    /// Returns an error if the HDF5 file or datasets cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, options: &ClusterWriteOptions) -> Result<Self> {
        let file = File::create(path)?;
        set_attr_str_file(&file, "tpreco_format_version", FORMAT_VERSION)?;
        let root = file.create_group("clusters")?;

        let planes = [
            PlaneWriter::new(&root, View::U, options)?,
            PlaneWriter::new(&root, View::V, options)?,
            PlaneWriter::new(&root, View::X, options)?,
        ];
        Ok(Self {
            _file: file,
            planes,
        })
    }

    /// Append records; each goes to the group of its view.
    ///
    /// # Errors
    /// Returns an error if a record is inconsistent or HDF5 I/O fails.
    pub fn append(&mut self, records: &[ClusterRecord]) -> Result<()> {
        for view in View::ALL {
            let batch: Vec<&ClusterRecord> = records.iter().filter(|r| r.view == view).collect();
            self.planes[view.index()].append(&batch)?;
        }
        Ok(())
    }

    /// Clusters written so far for a view.
    #[must_use]
    pub fn len(&self, view: View) -> usize {
        self.planes[view.index()].clusters
    }
}

struct PlaneWriter {
    clusters: usize,
    tps: usize,
    event: Dataset,
    apa: Dataset,
    cluster_id: Dataset,
    n_tps: Dataset,
    tp_offset: Dataset,
    is_main_cluster: Dataset,
    true_label: Dataset,
    true_pdg: Dataset,
    true_interaction: Dataset,
    true_position: Dataset,
    true_neutrino_momentum: Dataset,
    true_particle_momentum: Dataset,
    true_neutrino_energy: Dataset,
    true_particle_energy: Dataset,
    marley_tp_fraction: Dataset,
    generator_tp_fraction: Dataset,
    supernova_tp_fraction: Dataset,
    total_charge: Dataset,
    total_energy: Dataset,
    time_start: Dataset,
    time_end: Dataset,
    match_id: Dataset,
    match_type: Dataset,
    matching_cluster_id_u: Dataset,
    matching_cluster_id_v: Dataset,
    tp_event: Dataset,
    tp_channel: Dataset,
    tp_detector_channel: Dataset,
    tp_detector: Dataset,
    tp_samples_over_threshold: Dataset,
    tp_samples_to_peak: Dataset,
    tp_time_start: Dataset,
    tp_adc_peak: Dataset,
    tp_adc_integral: Dataset,
    tp_simide_energy: Dataset,
}

impl PlaneWriter {
    fn new(root: &Group, view: View, options: &ClusterWriteOptions) -> Result<Self> {
        fn make<T: H5Type>(group: &Group, name: &str, o: &ClusterWriteOptions) -> Result<Dataset> {
            create_extendable_dataset::<T>(group, name, o.chunk_rows, o.compression, o.shuffle)
        }
        // Variable-length strings are stored unfiltered.
        fn text(group: &Group, name: &str, o: &ClusterWriteOptions) -> Result<Dataset> {
            create_extendable_dataset::<VarLenUnicode>(group, name, o.chunk_rows, None, false)
        }

        let group = root.create_group(view.as_str())?;

        let o = options;
        let g = &group;
        Ok(Self {
            clusters: 0,
            tps: 0,
            event: make::<u32>(g, "event", o)?,
            apa: make::<u32>(g, "apa", o)?,
            cluster_id: make::<u32>(g, "cluster_id", o)?,
            n_tps: make::<u64>(g, "n_tps", o)?,
            tp_offset: make::<u64>(g, "tp_index", o)?,
            is_main_cluster: make::<u8>(g, "is_main_cluster", o)?,
            true_label: text(g, "true_label", o)?,
            true_pdg: make::<i32>(g, "true_pdg", o)?,
            true_interaction: text(g, "true_interaction", o)?,
            true_position: make::<f64>(g, "true_position", o)?,
            true_neutrino_momentum: make::<f64>(g, "true_neutrino_momentum", o)?,
            true_particle_momentum: make::<f64>(g, "true_particle_momentum", o)?,
            true_neutrino_energy: make::<f64>(g, "true_neutrino_energy", o)?,
            true_particle_energy: make::<f64>(g, "true_particle_energy", o)?,
            marley_tp_fraction: make::<f64>(g, "marley_tp_fraction", o)?,
            generator_tp_fraction: make::<f64>(g, "generator_tp_fraction", o)?,
            supernova_tp_fraction: make::<f64>(g, "supernova_tp_fraction", o)?,
            total_charge: make::<u64>(g, "total_charge", o)?,
            total_energy: make::<f64>(g, "total_energy", o)?,
            time_start: make::<u64>(g, "time_start", o)?,
            time_end: make::<u64>(g, "time_end", o)?,
            match_id: make::<i64>(g, "match_id", o)?,
            match_type: make::<i32>(g, "match_type", o)?,
            matching_cluster_id_u: make::<i64>(g, "matching_cluster_id_U", o)?,
            matching_cluster_id_v: make::<i64>(g, "matching_cluster_id_V", o)?,
            tp_event: make::<u32>(g, "tp_event", o)?,
            tp_channel: make::<u32>(g, "tp_channel", o)?,
            tp_detector_channel: make::<u32>(g, "tp_detector_channel", o)?,
            tp_detector: make::<u32>(g, "tp_detector", o)?,
            tp_samples_over_threshold: make::<u32>(g, "tp_samples_over_threshold", o)?,
            tp_samples_to_peak: make::<u32>(g, "tp_samples_to_peak", o)?,
            tp_time_start: make::<u64>(g, "tp_time_start", o)?,
            tp_adc_peak: make::<u32>(g, "tp_adc_peak", o)?,
            tp_adc_integral: make::<u32>(g, "tp_adc_integral", o)?,
            tp_simide_energy: make::<f64>(g, "tp_simide_energy", o)?,
        })
    }

    fn append(&mut self, records: &[&ClusterRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            record.validate()?;
        }

        let rows = self.clusters;
        let column = |f: fn(&ClusterRecord) -> u32| -> Vec<u32> { records.iter().map(|r| f(r)).collect() };
        append_slice(&self.event, rows, &column(|r| r.event))?;
        append_slice(&self.apa, rows, &column(|r| r.apa))?;
        append_slice(&self.cluster_id, rows, &column(|r| r.cluster_id))?;

        let mut offset = self.tps as u64;
        let mut n_tps = Vec::with_capacity(records.len());
        let mut offsets = Vec::with_capacity(records.len());
        for r in records {
            offsets.push(offset);
            n_tps.push(r.n_tps as u64);
            offset += r.n_tps as u64;
        }
        append_slice(&self.n_tps, rows, &n_tps)?;
        append_slice(&self.tp_offset, rows, &offsets)?;

        let is_main: Vec<u8> = records.iter().map(|r| u8::from(r.is_main_cluster)).collect();
        append_slice(&self.is_main_cluster, rows, &is_main)?;
        let labels = records
            .iter()
            .map(|r| to_var_len_unicode(&r.true_label))
            .collect::<Result<Vec<_>>>()?;
        append_slice(&self.true_label, rows, &labels)?;
        let interactions = records
            .iter()
            .map(|r| to_var_len_unicode(&r.true_interaction))
            .collect::<Result<Vec<_>>>()?;
        append_slice(&self.true_interaction, rows, &interactions)?;
        let pdg: Vec<i32> = records.iter().map(|r| r.true_pdg).collect();
        append_slice(&self.true_pdg, rows, &pdg)?;

        let vector = |f: fn(&ClusterRecord) -> [f64; 3]| -> Vec<f64> {
            records.iter().flat_map(|r| f(r)).collect()
        };
        append_slice(&self.true_position, rows * 3, &vector(|r| r.true_position))?;
        append_slice(
            &self.true_neutrino_momentum,
            rows * 3,
            &vector(|r| r.true_neutrino_momentum),
        )?;
        append_slice(
            &self.true_particle_momentum,
            rows * 3,
            &vector(|r| r.true_particle_momentum),
        )?;

        let real = |f: fn(&ClusterRecord) -> f64| -> Vec<f64> { records.iter().map(|r| f(r)).collect() };
        append_slice(&self.true_neutrino_energy, rows, &real(|r| r.true_neutrino_energy))?;
        append_slice(&self.true_particle_energy, rows, &real(|r| r.true_particle_energy))?;
        append_slice(&self.marley_tp_fraction, rows, &real(|r| r.marley_tp_fraction))?;
        append_slice(&self.generator_tp_fraction, rows, &real(|r| r.generator_tp_fraction))?;
        append_slice(&self.supernova_tp_fraction, rows, &real(|r| r.supernova_tp_fraction))?;
        append_slice(&self.total_energy, rows, &real(|r| r.total_energy))?;

        let wide = |f: fn(&ClusterRecord) -> u64| -> Vec<u64> { records.iter().map(|r| f(r)).collect() };
        append_slice(&self.total_charge, rows, &wide(|r| r.total_charge))?;
        append_slice(&self.time_start, rows, &wide(|r| r.time_start))?;
        append_slice(&self.time_end, rows, &wide(|r| r.time_end))?;

        let signed = |f: fn(&ClusterRecord) -> i64| -> Vec<i64> { records.iter().map(|r| f(r)).collect() };
        append_slice(&self.match_id, rows, &signed(|r| r.match_id))?;
        append_slice(
            &self.matching_cluster_id_u,
            rows,
            &signed(|r| r.matching_cluster_id_u.unwrap_or(-1)),
        )?;
        append_slice(
            &self.matching_cluster_id_v,
            rows,
            &signed(|r| r.matching_cluster_id_v.unwrap_or(-1)),
        )?;
        let match_type: Vec<i32> = records.iter().map(|r| r.match_type).collect();
        append_slice(&self.match_type, rows, &match_type)?;

        let mut tps = TpColumns::default();
        for r in records {
            tps.tp_event.extend_from_slice(&r.tps.tp_event);
            tps.tp_channel.extend_from_slice(&r.tps.tp_channel);
            tps.tp_detector_channel.extend_from_slice(&r.tps.tp_detector_channel);
            tps.tp_detector.extend_from_slice(&r.tps.tp_detector);
            tps.tp_samples_over_threshold
                .extend_from_slice(&r.tps.tp_samples_over_threshold);
            tps.tp_samples_to_peak.extend_from_slice(&r.tps.tp_samples_to_peak);
            tps.tp_time_start.extend_from_slice(&r.tps.tp_time_start);
            tps.tp_adc_peak.extend_from_slice(&r.tps.tp_adc_peak);
            tps.tp_adc_integral.extend_from_slice(&r.tps.tp_adc_integral);
            tps.tp_simide_energy.extend_from_slice(&r.tps.tp_simide_energy);
        }
        let at = self.tps;
        append_slice(&self.tp_event, at, &tps.tp_event)?;
        append_slice(&self.tp_channel, at, &tps.tp_channel)?;
        append_slice(&self.tp_detector_channel, at, &tps.tp_detector_channel)?;
        append_slice(&self.tp_detector, at, &tps.tp_detector)?;
        append_slice(&self.tp_samples_over_threshold, at, &tps.tp_samples_over_threshold)?;
        append_slice(&self.tp_samples_to_peak, at, &tps.tp_samples_to_peak)?;
        append_slice(&self.tp_time_start, at, &tps.tp_time_start)?;
        append_slice(&self.tp_adc_peak, at, &tps.tp_adc_peak)?;
        append_slice(&self.tp_adc_integral, at, &tps.tp_adc_integral)?;
        append_slice(&self.tp_simide_energy, at, &tps.tp_simide_energy)?;

        self.clusters += records.len();
        self.tps += tps.len();
        Ok(())
    }
}

/// Writes records to a new HDF5 file in one go.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_clusters_hdf5<P: AsRef<Path>>(
    path: P,
    records: &[ClusterRecord],
    options: &ClusterWriteOptions,
) -> Result<()> {
    let mut sink = Hdf5ClusterSink::create(path, options)?;
    sink.append(records)
}

/// Reads the clusters of one view back into records.
///
/// # Errors
/// Returns an error if the file or a dataset is missing or inconsistent.
#[allow(clippy::cast_possible_truncation)]
pub fn read_clusters_hdf5<P: AsRef<Path>>(path: P, view: View) -> Result<Vec<ClusterRecord>> {
    let file = File::open(path)?;
    let group = file.group(&format!("clusters/{}", view.as_str()))?;

    let event = read_dataset_vec::<u32>(&group, "event")?;
    let n = event.len();
    let apa = read_dataset_vec::<u32>(&group, "apa")?;
    let cluster_id = read_dataset_vec::<u32>(&group, "cluster_id")?;
    let n_tps = read_dataset_vec::<u64>(&group, "n_tps")?;
    let tp_offset = read_dataset_vec::<u64>(&group, "tp_index")?;
    let is_main = read_dataset_vec::<u8>(&group, "is_main_cluster")?;
    let labels = read_dataset_vec::<VarLenUnicode>(&group, "true_label")?;
    let interactions = read_dataset_vec::<VarLenUnicode>(&group, "true_interaction")?;
    let pdg = read_dataset_vec::<i32>(&group, "true_pdg")?;
    let position = read_dataset_vec::<f64>(&group, "true_position")?;
    let nu_momentum = read_dataset_vec::<f64>(&group, "true_neutrino_momentum")?;
    let particle_momentum = read_dataset_vec::<f64>(&group, "true_particle_momentum")?;
    let nu_energy = read_dataset_vec::<f64>(&group, "true_neutrino_energy")?;
    let particle_energy = read_dataset_vec::<f64>(&group, "true_particle_energy")?;
    let marley = read_dataset_vec::<f64>(&group, "marley_tp_fraction")?;
    let generator = read_dataset_vec::<f64>(&group, "generator_tp_fraction")?;
    let supernova = read_dataset_vec::<f64>(&group, "supernova_tp_fraction")?;
    let total_charge = read_dataset_vec::<u64>(&group, "total_charge")?;
    let total_energy = read_dataset_vec::<f64>(&group, "total_energy")?;
    let time_start = read_dataset_vec::<u64>(&group, "time_start")?;
    let time_end = read_dataset_vec::<u64>(&group, "time_end")?;
    let match_id = read_dataset_vec::<i64>(&group, "match_id")?;
    let match_type = read_dataset_vec::<i32>(&group, "match_type")?;
    let partner_u = read_dataset_vec::<i64>(&group, "matching_cluster_id_U")?;
    let partner_v = read_dataset_vec::<i64>(&group, "matching_cluster_id_V")?;

    let all_tps = TpColumns {
        tp_event: read_dataset_vec(&group, "tp_event")?,
        tp_channel: read_dataset_vec(&group, "tp_channel")?,
        tp_detector_channel: read_dataset_vec(&group, "tp_detector_channel")?,
        tp_detector: read_dataset_vec(&group, "tp_detector")?,
        tp_samples_over_threshold: read_dataset_vec(&group, "tp_samples_over_threshold")?,
        tp_samples_to_peak: read_dataset_vec(&group, "tp_samples_to_peak")?,
        tp_time_start: read_dataset_vec(&group, "tp_time_start")?,
        tp_adc_peak: read_dataset_vec(&group, "tp_adc_peak")?,
        tp_adc_integral: read_dataset_vec(&group, "tp_adc_integral")?,
        tp_simide_energy: read_dataset_vec(&group, "tp_simide_energy")?,
    };
    all_tps.validate()?;

    let per_cluster = [
        ("apa", apa.len()),
        ("cluster_id", cluster_id.len()),
        ("n_tps", n_tps.len()),
        ("tp_index", tp_offset.len()),
        ("is_main_cluster", is_main.len()),
        ("true_label", labels.len()),
        ("true_interaction", interactions.len()),
        ("true_pdg", pdg.len()),
        ("true_neutrino_energy", nu_energy.len()),
        ("true_particle_energy", particle_energy.len()),
        ("marley_tp_fraction", marley.len()),
        ("generator_tp_fraction", generator.len()),
        ("supernova_tp_fraction", supernova.len()),
        ("total_charge", total_charge.len()),
        ("total_energy", total_energy.len()),
        ("time_start", time_start.len()),
        ("time_end", time_end.len()),
        ("match_id", match_id.len()),
        ("match_type", match_type.len()),
        ("matching_cluster_id_U", partner_u.len()),
        ("matching_cluster_id_V", partner_v.len()),
    ];
    let per_vector = [
        ("true_position", position.len()),
        ("true_neutrino_momentum", nu_momentum.len()),
        ("true_particle_momentum", particle_momentum.len()),
    ];
    let mismatch = per_cluster
        .iter()
        .find(|(_, len)| *len != n)
        .or_else(|| per_vector.iter().find(|(_, len)| *len != 3 * n));
    if let Some((name, len)) = mismatch {
        return Err(Error::InvalidFormat(format!(
            "dataset {view}/{name} has {len} entries for {n} clusters"
        )));
    }

    let vec3 = |data: &[f64], i: usize| [data[3 * i], data[3 * i + 1], data[3 * i + 2]];
    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let start = tp_offset[i] as usize;
        let end = start + n_tps[i] as usize;
        if end > all_tps.len() {
            return Err(Error::InvalidFormat(format!(
                "cluster {} of {view} points past the TP datasets",
                cluster_id[i]
            )));
        }
        let tps = slice_columns(&all_tps, start, end);
        let is_x = view == View::X;
        let interaction = interactions[i].as_str().to_string();
        records.push(ClusterRecord {
            event: event[i],
            view,
            apa: apa[i],
            n_tps: n_tps[i] as usize,
            cluster_id: cluster_id[i],
            is_main_cluster: is_main[i] != 0,
            true_label: labels[i].as_str().to_string(),
            true_pdg: pdg[i],
            is_es_interaction: interaction.eq_ignore_ascii_case("ES"),
            true_interaction: interaction,
            true_position: vec3(&position, i),
            true_neutrino_momentum: vec3(&nu_momentum, i),
            true_particle_momentum: vec3(&particle_momentum, i),
            true_neutrino_energy: nu_energy[i],
            true_particle_energy: particle_energy[i],
            marley_tp_fraction: marley[i],
            generator_tp_fraction: generator[i],
            supernova_tp_fraction: supernova[i],
            total_charge: total_charge[i],
            total_energy: total_energy[i],
            time_start: time_start[i],
            time_end: time_end[i],
            match_id: match_id[i],
            match_type: match_type[i],
            matching_cluster_id_u: is_x.then_some(partner_u[i]),
            matching_cluster_id_v: is_x.then_some(partner_v[i]),
            tps,
        });
    }
    Ok(records)
}

fn slice_columns(all: &TpColumns, start: usize, end: usize) -> TpColumns {
    TpColumns {
        tp_event: all.tp_event[start..end].to_vec(),
        tp_channel: all.tp_channel[start..end].to_vec(),
        tp_detector_channel: all.tp_detector_channel[start..end].to_vec(),
        tp_detector: all.tp_detector[start..end].to_vec(),
        tp_samples_over_threshold: all.tp_samples_over_threshold[start..end].to_vec(),
        tp_samples_to_peak: all.tp_samples_to_peak[start..end].to_vec(),
        tp_time_start: all.tp_time_start[start..end].to_vec(),
        tp_adc_peak: all.tp_adc_peak[start..end].to_vec(),
        tp_adc_integral: all.tp_adc_integral[start..end].to_vec(),
        tp_simide_energy: all.tp_simide_energy[start..end].to_vec(),
    }
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    chunk_rows: usize,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset> {
    let mut builder = group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((chunk_rows.max(1),));

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 string: {e}")))
}
