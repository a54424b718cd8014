//! Persisted cluster and match records.
//!
//! A record carries the cluster aggregates plus parallel per-TP columns in
//! member order. Absent ids are written as -1.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tpreco_algorithms::JoinedCluster;
use tpreco_core::cluster::Cluster;
use tpreco_core::store::{TpIndex, TpStore};
use tpreco_core::tp::View;

/// Per-TP parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TpColumns {
    pub tp_event: Vec<u32>,
    pub tp_channel: Vec<u32>,
    pub tp_detector_channel: Vec<u32>,
    pub tp_detector: Vec<u32>,
    pub tp_samples_over_threshold: Vec<u32>,
    pub tp_samples_to_peak: Vec<u32>,
    pub tp_time_start: Vec<u64>,
    pub tp_adc_peak: Vec<u32>,
    pub tp_adc_integral: Vec<u32>,
    pub tp_simide_energy: Vec<f64>,
}

impl TpColumns {
    /// Collects the columns of the listed TPs.
    ///
    /// # Errors
    /// Returns an error for an index outside the store.
    pub fn collect(store: &TpStore, indices: &[TpIndex]) -> Result<Self> {
        let mut columns = Self::with_capacity(indices.len());
        for tp in store.resolve(indices)? {
            columns.tp_event.push(tp.event);
            columns.tp_channel.push(tp.channel);
            columns.tp_detector_channel.push(tp.detector_channel);
            columns.tp_detector.push(tp.detector);
            columns.tp_samples_over_threshold.push(tp.samples_over_threshold);
            columns.tp_samples_to_peak.push(tp.samples_to_peak);
            columns.tp_time_start.push(tp.time_start);
            columns.tp_adc_peak.push(tp.adc_peak);
            columns.tp_adc_integral.push(tp.adc_integral);
            columns.tp_simide_energy.push(tp.simide_energy);
        }
        Ok(columns)
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            tp_event: Vec::with_capacity(n),
            tp_channel: Vec::with_capacity(n),
            tp_detector_channel: Vec::with_capacity(n),
            tp_detector: Vec::with_capacity(n),
            tp_samples_over_threshold: Vec::with_capacity(n),
            tp_samples_to_peak: Vec::with_capacity(n),
            tp_time_start: Vec::with_capacity(n),
            tp_adc_peak: Vec::with_capacity(n),
            tp_adc_integral: Vec::with_capacity(n),
            tp_simide_energy: Vec::with_capacity(n),
        }
    }

    /// Number of TPs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tp_time_start.len()
    }

    /// Returns true without TPs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tp_time_start.is_empty()
    }

    /// Checks every column has the same length.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] on ragged columns.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let lengths = [
            self.tp_event.len(),
            self.tp_channel.len(),
            self.tp_detector_channel.len(),
            self.tp_detector.len(),
            self.tp_samples_over_threshold.len(),
            self.tp_samples_to_peak.len(),
            self.tp_adc_peak.len(),
            self.tp_adc_integral.len(),
            self.tp_simide_energy.len(),
        ];
        if lengths.iter().any(|&l| l != n) {
            return Err(Error::InvalidFormat(format!(
                "per-TP columns have different lengths: {n} vs {lengths:?}"
            )));
        }
        Ok(())
    }
}

/// One persisted cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub event: u32,
    pub view: View,
    pub apa: u32,
    pub n_tps: usize,
    pub cluster_id: u32,
    pub is_main_cluster: bool,
    pub true_label: String,
    pub true_pdg: i32,
    pub true_interaction: String,
    pub true_position: [f64; 3],
    pub true_neutrino_momentum: [f64; 3],
    pub true_particle_momentum: [f64; 3],
    pub true_neutrino_energy: f64,
    pub true_particle_energy: f64,
    pub is_es_interaction: bool,
    pub marley_tp_fraction: f64,
    pub generator_tp_fraction: f64,
    pub supernova_tp_fraction: f64,
    pub total_charge: u64,
    pub total_energy: f64,
    pub time_start: u64,
    pub time_end: u64,
    pub match_id: i64,
    pub match_type: i32,
    /// X plane only.
    #[serde(
        rename = "matching_cluster_id_U",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub matching_cluster_id_u: Option<i64>,
    /// X plane only.
    #[serde(
        rename = "matching_cluster_id_V",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub matching_cluster_id_v: Option<i64>,
    #[serde(flatten)]
    pub tps: TpColumns,
}

fn id_or_missing(id: Option<u32>) -> i64 {
    id.map_or(-1, i64::from)
}

impl ClusterRecord {
    /// Builds the record of a cluster.
    ///
    /// # Errors
    /// Returns an error if a member TP is missing from `store`.
    pub fn from_cluster(cluster: &Cluster, store: &TpStore) -> Result<Self> {
        let truth = &cluster.truth;
        let is_x = cluster.view == View::X;
        Ok(Self {
            event: cluster.event,
            view: cluster.view,
            apa: cluster.apa,
            n_tps: cluster.len(),
            cluster_id: cluster.cluster_id,
            is_main_cluster: cluster.is_main_cluster,
            true_label: truth.label.clone(),
            true_pdg: truth.pdg,
            true_interaction: truth.interaction.clone(),
            true_position: truth.position,
            true_neutrino_momentum: truth.neutrino_momentum,
            true_particle_momentum: truth.particle_momentum,
            true_neutrino_energy: truth.neutrino_energy,
            true_particle_energy: truth.particle_energy,
            is_es_interaction: truth.is_es_interaction(),
            marley_tp_fraction: cluster.marley_tp_fraction,
            generator_tp_fraction: cluster.generator_tp_fraction,
            supernova_tp_fraction: cluster.supernova_tp_fraction,
            total_charge: cluster.total_charge,
            total_energy: cluster.total_energy,
            time_start: cluster.time_range.start,
            time_end: cluster.time_range.end,
            match_id: id_or_missing(cluster.match_id),
            match_type: cluster.match_type.code(),
            matching_cluster_id_u: is_x.then(|| id_or_missing(cluster.matched_u)),
            matching_cluster_id_v: is_x.then(|| id_or_missing(cluster.matched_v)),
            tps: TpColumns::collect(store, cluster.tps())?,
        })
    }

    /// Checks the record is internally consistent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] when `n_tps` disagrees with the columns.
    pub fn validate(&self) -> Result<()> {
        self.tps.validate()?;
        if self.tps.len() != self.n_tps {
            return Err(Error::InvalidFormat(format!(
                "cluster {}: n_tps {} but {} TP entries",
                self.cluster_id,
                self.n_tps,
                self.tps.len()
            )));
        }
        Ok(())
    }
}

/// One persisted match: the joined cluster and its constituents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: u32,
    pub match_type: i32,
    pub event: u32,
    pub apa: u32,
    pub x_cluster_id: u32,
    pub u_cluster_id: i64,
    pub v_cluster_id: i64,
    pub n_tps: usize,
    pub total_charge: u64,
    pub total_energy: f64,
    pub time_start: u64,
    pub time_end: u64,
    pub true_label: String,
    pub true_pdg: i32,
    pub true_interaction: String,
    pub true_neutrino_energy: f64,
    pub true_particle_energy: f64,
    #[serde(flatten)]
    pub tps: TpColumns,
}

impl MatchRecord {
    /// Builds the record of a joined match.
    ///
    /// # Errors
    /// Returns an error if a member TP is missing from `store`.
    pub fn from_joined(joined: &JoinedCluster, store: &TpStore) -> Result<Self> {
        Ok(Self {
            match_id: joined.match_id,
            match_type: joined.match_type.code(),
            event: joined.event,
            apa: joined.apa,
            x_cluster_id: joined.x,
            u_cluster_id: id_or_missing(joined.u),
            v_cluster_id: id_or_missing(joined.v),
            n_tps: joined.tps.len(),
            total_charge: joined.total_charge,
            total_energy: joined.total_energy,
            time_start: joined.time_range.start,
            time_end: joined.time_range.end,
            true_label: joined.truth.label.clone(),
            true_pdg: joined.truth.pdg,
            true_interaction: joined.truth.interaction.clone(),
            true_neutrino_energy: joined.truth.neutrino_energy,
            true_particle_energy: joined.truth.particle_energy,
            tps: TpColumns::collect(store, &joined.tps)?,
        })
    }
}
