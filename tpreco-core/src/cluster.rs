//! Single-plane clusters of trigger primitives.
#![allow(clippy::cast_precision_loss)]

use crate::error::{Error, Result};
use crate::geometry::DetectorGeometry;
use crate::range::TimeRange;
use crate::store::{TpIndex, TpStore};
use crate::tp::{TriggerPrimitive, View, SIGNAL_GENERATOR, UNKNOWN_GENERATOR};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense per-file cluster identifier.
pub type ClusterId = u32;

/// Dense per-file match identifier.
pub type MatchId = u32;

/// Plane composition of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchType {
    /// Main X cluster with no partner, or a cluster outside any match.
    #[default]
    Unmatched,
    /// X and V only.
    XV,
    /// X and U only.
    XU,
    /// X, U and V.
    Complete,
}

impl MatchType {
    /// Integer code used in persisted records: -1, 1, 2, 3.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            MatchType::Unmatched => -1,
            MatchType::XV => 1,
            MatchType::XU => 2,
            MatchType::Complete => 3,
        }
    }

    /// Inverse of [`MatchType::code`].
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(MatchType::Unmatched),
            1 => Some(MatchType::XV),
            2 => Some(MatchType::XU),
            3 => Some(MatchType::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchType::Unmatched => "unmatched",
            MatchType::XV => "X+V",
            MatchType::XU => "X+U",
            MatchType::Complete => "X+U+V",
        })
    }
}

/// Truth attributes propagated to a cluster from its dominant member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTruth {
    pub label: String,
    pub pdg: i32,
    pub interaction: String,
    pub position: [f64; 3],
    pub neutrino_momentum: [f64; 3],
    pub particle_momentum: [f64; 3],
    pub neutrino_energy: f64,
    pub particle_energy: f64,
}

impl Default for ClusterTruth {
    fn default() -> Self {
        Self {
            label: UNKNOWN_GENERATOR.to_string(),
            pdg: 0,
            interaction: String::new(),
            position: [0.0; 3],
            neutrino_momentum: [0.0; 3],
            particle_momentum: [0.0; 3],
            neutrino_energy: 0.0,
            particle_energy: 0.0,
        }
    }
}

impl ClusterTruth {
    /// Picks the dominant truth of a set of TPs.
    ///
    /// The label is the most frequent known generator (first seen wins a
    /// tie). The other attributes come from the member with that label and
    /// the largest `simide_energy`.
    #[must_use]
    pub fn dominant(tps: &[&TriggerPrimitive]) -> Self {
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for tp in tps.iter().filter(|tp| tp.truth.is_known()) {
            let name = tp.truth.generator_name.as_str();
            match tally.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => tally.push((name, 1)),
            }
        }

        // max_by_key keeps the last maximum, so scan in reverse to keep the first.
        let Some((label, _)) = tally.iter().rev().max_by_key(|(_, count)| *count) else {
            return Self::default();
        };

        let mut best: Option<&TriggerPrimitive> = None;
        for &tp in tps.iter().filter(|tp| tp.truth.generator_name == *label) {
            if best.map_or(true, |b| tp.simide_energy > b.simide_energy) {
                best = Some(tp);
            }
        }
        let Some(source) = best else {
            return Self::default();
        };

        let truth = &source.truth;
        Self {
            label: truth.generator_name.clone(),
            pdg: truth.pdg,
            interaction: truth.process.clone(),
            position: truth.position,
            neutrino_momentum: truth.neutrino_momentum,
            particle_momentum: truth.particle_momentum,
            neutrino_energy: truth.neutrino_energy,
            particle_energy: truth.particle_energy,
        }
    }

    /// Returns true when the label is the signal generator.
    #[must_use]
    pub fn is_signal(&self) -> bool {
        self.label.eq_ignore_ascii_case(SIGNAL_GENERATOR)
    }

    /// Returns true for elastic-scattering interactions.
    #[must_use]
    pub fn is_es_interaction(&self) -> bool {
        self.interaction.eq_ignore_ascii_case("ES")
    }
}

/// A set of TPs from one (event, view) with aggregated attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Dense per-file identifier.
    pub cluster_id: ClusterId,
    /// Event shared by all members.
    pub event: u32,
    /// View shared by all members.
    pub view: View,
    /// APA of the first member.
    pub apa: u32,
    /// Detector index of the first member.
    pub detector: u32,
    tps: Vec<TpIndex>,
    /// `[min(time_start), max(time_start + sot)]` in TDC ticks.
    pub time_range: TimeRange,
    /// Sum of member ADC integrals.
    pub total_charge: u64,
    /// `total_charge` converted to MeV with the view's factor.
    pub total_energy: f64,
    /// Dominant truth.
    pub truth: ClusterTruth,
    /// Fraction of members from the signal generator.
    pub marley_tp_fraction: f64,
    /// Fraction of members with any known generator.
    pub generator_tp_fraction: f64,
    /// Fraction of members linked to a parent neutrino.
    pub supernova_tp_fraction: f64,
    /// Set by the main-cluster selector.
    pub is_main_cluster: bool,
    /// Match this cluster belongs to.
    pub match_id: Option<MatchId>,
    /// Composition of that match.
    pub match_type: MatchType,
    /// U partner of a main X cluster.
    pub matched_u: Option<ClusterId>,
    /// V partner of a main X cluster.
    pub matched_v: Option<ClusterId>,
}

impl Cluster {
    /// Builds a cluster and its aggregates from stored TPs.
    ///
    /// # Errors
    /// Fails on an empty member list, unknown indices, or members that do
    /// not share one event and one view.
    pub fn build(
        cluster_id: ClusterId,
        store: &TpStore,
        tps: Vec<TpIndex>,
        geometry: &DetectorGeometry,
    ) -> Result<Self> {
        let members = store.resolve(&tps)?;
        let first = *members.first().ok_or(Error::EmptyCluster)?;

        for tp in &members[1..] {
            if tp.event != first.event {
                return Err(Error::MixedEvents {
                    expected: first.event,
                    found: tp.event,
                });
            }
            if tp.view != first.view {
                return Err(Error::MixedViews {
                    expected: first.view,
                    found: tp.view,
                });
            }
        }

        let mut time_range = first.time_range(geometry);
        let mut total_charge = 0u64;
        let mut signal = 0usize;
        let mut known = 0usize;
        let mut supernova = 0usize;
        for tp in &members {
            time_range = time_range.union(&tp.time_range(geometry));
            total_charge += u64::from(tp.adc_integral);
            signal += usize::from(tp.truth.is_signal());
            known += usize::from(tp.truth.is_known());
            supernova += usize::from(tp.truth.has_neutrino());
        }
        let n = members.len() as f64;

        Ok(Self {
            cluster_id,
            event: first.event,
            view: first.view,
            apa: first.apa(geometry),
            detector: first.detector,
            time_range,
            total_charge,
            total_energy: geometry.charge_to_energy(first.view, total_charge),
            truth: ClusterTruth::dominant(&members),
            marley_tp_fraction: signal as f64 / n,
            generator_tp_fraction: known as f64 / n,
            supernova_tp_fraction: supernova as f64 / n,
            is_main_cluster: false,
            match_id: None,
            match_type: MatchType::Unmatched,
            matched_u: None,
            matched_v: None,
            tps,
        })
    }

    /// Member TP indices in insertion order.
    #[must_use]
    pub fn tps(&self) -> &[TpIndex] {
        &self.tps
    }

    /// Number of member TPs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tps.len()
    }

    /// Always false for a built cluster; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tps.is_empty()
    }

    /// Earliest member `time_start`.
    #[inline]
    #[must_use]
    pub fn time_start(&self) -> u64 {
        self.time_range.start
    }

    /// Clears all match annotations.
    pub fn clear_match(&mut self) {
        self.match_id = None;
        self.match_type = MatchType::Unmatched;
        self.matched_u = None;
        self.matched_v = None;
    }
}
