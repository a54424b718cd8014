//! Cross-plane matching of main X clusters with U and V clusters.
//!
//! Each plane is scanned with a time-sorted sweep: a binary search finds
//! the first candidate starting at or after the X start, the scan backs off
//! a few positions and walks forward until candidates start too late to
//! overlap. The first candidate passing the time, event and APA filters is
//! bound.

use crate::diagnostics::{MatchDiagnostics, RejectReason};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tpreco_core::cluster::{Cluster, ClusterId, MatchId, MatchType};
use tpreco_core::error::{Error, Result};
use tpreco_core::geometry::DetectorGeometry;
use tpreco_core::tp::View;

/// Matcher parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Time-overlap tolerance (TPC ticks).
    pub time_tolerance_ticks: u32,
    /// Tolerance handed to the compatibility hook (cm).
    pub spatial_tolerance_cm: f64,
    /// Positions to step back from the binary-search hit.
    pub scan_backoff: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            time_tolerance_ticks: 5,
            spatial_tolerance_cm: 5.0,
            scan_backoff: 10,
        }
    }
}

impl MatchingConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time tolerance (TPC ticks).
    #[must_use]
    pub fn with_time_tolerance_ticks(mut self, ticks: u32) -> Self {
        self.time_tolerance_ticks = ticks;
        self
    }

    /// Sets the spatial tolerance (cm).
    #[must_use]
    pub fn with_spatial_tolerance_cm(mut self, cm: f64) -> Self {
        self.spatial_tolerance_cm = cm;
        self
    }

    /// Sets the scan back-off.
    #[must_use]
    pub fn with_scan_backoff(mut self, positions: usize) -> Self {
        self.scan_backoff = positions;
        self
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Returns an error for a negative or non-finite spatial tolerance.
    pub fn validate(&self) -> Result<()> {
        if !self.spatial_tolerance_cm.is_finite() || self.spatial_tolerance_cm < 0.0 {
            return Err(Error::ConfigError(format!(
                "spatial_tolerance_cm must be a non-negative number, got {}",
                self.spatial_tolerance_cm
            )));
        }
        Ok(())
    }
}

/// A main X cluster bound to U and/or V partners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Dense per-file id.
    pub match_id: MatchId,
    /// Plane composition.
    pub match_type: MatchType,
    /// Event of the X cluster.
    pub event: u32,
    /// APA of the X cluster.
    pub apa: u32,
    /// Main X cluster.
    pub x: ClusterId,
    /// Bound U cluster.
    pub u: Option<ClusterId>,
    /// Bound V cluster.
    pub v: Option<ClusterId>,
}

impl Match {
    /// Constituent cluster ids in X, U, V order.
    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        std::iter::once(self.x).chain(self.u).chain(self.v)
    }
}

/// Result of matching one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// Emitted matches, indexed by `match_id`.
    pub matches: Vec<Match>,
    /// Cluster to match membership; the first match to claim a cluster wins.
    pub match_of: BTreeMap<ClusterId, MatchId>,
    /// Main X to its U partner in the emitted match.
    pub x_to_u: BTreeMap<ClusterId, ClusterId>,
    /// Main X to its V partner in the emitted match.
    pub x_to_v: BTreeMap<ClusterId, ClusterId>,
    /// Counters for this file.
    pub diagnostics: MatchDiagnostics,
}

impl MatchOutcome {
    /// Match id of a cluster, -1 when unmatched.
    #[must_use]
    pub fn match_id_of(&self, cluster_id: ClusterId) -> i64 {
        self.match_of
            .get(&cluster_id)
            .map_or(-1, |&id| i64::from(id))
    }

    /// U partner of a main X cluster, -1 when absent.
    #[must_use]
    pub fn u_partner_of(&self, x: ClusterId) -> i64 {
        self.x_to_u.get(&x).map_or(-1, |&id| i64::from(id))
    }

    /// V partner of a main X cluster, -1 when absent.
    #[must_use]
    pub fn v_partner_of(&self, x: ClusterId) -> i64 {
        self.x_to_v.get(&x).map_or(-1, |&id| i64::from(id))
    }

    /// Copies match membership onto clusters.
    ///
    /// Clusters outside every match are reset to unmatched.
    pub fn annotate(&self, clusters: &mut [Cluster]) {
        for cluster in clusters {
            cluster.clear_match();
            let Some(&match_id) = self.match_of.get(&cluster.cluster_id) else {
                continue;
            };
            let Some(m) = self.matches.get(match_id as usize) else {
                continue;
            };
            cluster.match_id = Some(match_id);
            cluster.match_type = m.match_type;
            if cluster.view == View::X && m.x == cluster.cluster_id {
                cluster.matched_u = m.u;
                cluster.matched_v = m.v;
            }
        }
    }
}

/// Sorts clusters into matcher order: `time_start`, then event, then id.
pub fn sort_for_matching(clusters: &mut [Cluster]) {
    clusters.sort_by_key(|c| (c.time_start(), c.event, c.cluster_id));
}

/// Compatibility hook for a candidate triple.
///
/// Reduces to all three clusters carrying the same detector index; the
/// spatial tolerance is accepted for wire-crossing checks but unused.
#[must_use]
pub fn are_compatible(u: &Cluster, v: &Cluster, x: &Cluster, _spatial_tolerance_cm: f64) -> bool {
    u.detector == x.detector && v.detector == x.detector
}

/// Cross-plane matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchingConfig,
    geometry: DetectorGeometry,
}

impl Matcher {
    /// Creates a matcher.
    #[must_use]
    pub fn new(config: MatchingConfig, geometry: DetectorGeometry) -> Self {
        Self { config, geometry }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Time tolerance in TDC ticks.
    #[must_use]
    pub fn tolerance_tdc(&self) -> u64 {
        self.geometry
            .tpc_to_tdc(u64::from(self.config.time_tolerance_ticks))
    }

    /// Matches every main cluster of `x` against `u` and `v`.
    ///
    /// All three slices must be sorted with [`sort_for_matching`]; unsorted
    /// input gives unspecified bindings. Non-main X clusters are ignored.
    #[must_use]
    pub fn match_clusters(&self, u: &[Cluster], v: &[Cluster], x: &[Cluster]) -> MatchOutcome {
        let tolerance = self.tolerance_tdc();
        let mut outcome = MatchOutcome::default();
        let mains: Vec<&Cluster> = x.iter().filter(|c| c.is_main_cluster).collect();
        outcome.diagnostics.main_x_clusters = mains.len() as u64;

        let u_bound: Vec<Option<&Cluster>> = mains
            .iter()
            .map(|main| self.find_partner(main, u, View::U, tolerance, &mut outcome.diagnostics))
            .collect();
        let v_bound: Vec<Option<&Cluster>> = mains
            .iter()
            .map(|main| self.find_partner(main, v, View::V, tolerance, &mut outcome.diagnostics))
            .collect();

        for ((main, u_partner), v_partner) in mains.iter().zip(u_bound).zip(v_bound) {
            let (match_type, u_partner, v_partner) = match (u_partner, v_partner) {
                (Some(uc), Some(vc)) => {
                    if are_compatible(uc, vc, main, self.config.spatial_tolerance_cm) {
                        (MatchType::Complete, Some(uc), Some(vc))
                    } else {
                        outcome.diagnostics.failed_spatial += 1;
                        (MatchType::XU, Some(uc), None)
                    }
                }
                (Some(uc), None) => (MatchType::XU, Some(uc), None),
                (None, Some(vc)) => (MatchType::XV, None, Some(vc)),
                (None, None) => {
                    outcome.diagnostics.unmatched_mains += 1;
                    continue;
                }
            };

            match match_type {
                MatchType::Complete => outcome.diagnostics.complete_matches += 1,
                MatchType::XU => outcome.diagnostics.xu_matches += 1,
                MatchType::XV => outcome.diagnostics.xv_matches += 1,
                MatchType::Unmatched => {}
            }

            let match_id = outcome.matches.len() as MatchId;
            let m = Match {
                match_id,
                match_type,
                event: main.event,
                apa: main.apa,
                x: main.cluster_id,
                u: u_partner.map(|c| c.cluster_id),
                v: v_partner.map(|c| c.cluster_id),
            };
            for cluster_id in m.cluster_ids() {
                outcome.match_of.entry(cluster_id).or_insert(match_id);
            }
            if let Some(id) = m.u {
                outcome.x_to_u.insert(m.x, id);
            }
            if let Some(id) = m.v {
                outcome.x_to_v.insert(m.x, id);
            }
            outcome.matches.push(m);
        }

        debug!(
            "matched {} of {} main X clusters ({} complete)",
            outcome.matches.len(),
            outcome.diagnostics.main_x_clusters,
            outcome.diagnostics.complete_matches
        );
        outcome
    }

    /// First candidate passing the time, event and APA filters.
    fn find_partner<'a>(
        &self,
        main: &Cluster,
        candidates: &'a [Cluster],
        view: View,
        tolerance: u64,
        diagnostics: &mut MatchDiagnostics,
    ) -> Option<&'a Cluster> {
        let first = candidates.partition_point(|c| c.time_start() < main.time_range.start);
        let start = first.saturating_sub(self.config.scan_backoff);
        let last_start = main.time_range.end.saturating_add(tolerance);

        for candidate in &candidates[start..] {
            if candidate.time_start() > last_start {
                break;
            }
            if !main.time_range.overlaps(&candidate.time_range, tolerance) {
                diagnostics.record_rejection(view, RejectReason::Time);
                continue;
            }
            let delta = i64::from(candidate.event) - i64::from(main.event);
            diagnostics.record_event_delta(view, delta);
            if delta != 0 {
                diagnostics.record_rejection(view, RejectReason::Event);
                continue;
            }
            if candidate.apa != main.apa {
                diagnostics.record_rejection(view, RejectReason::Apa);
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpreco_core::range::TimeRange;
    use tpreco_core::store::TpStore;
    use tpreco_core::tp::TriggerPrimitive;

    fn cluster(store: &mut TpStore, id: ClusterId, view: View, event: u32, start: u64, end: u64) -> Cluster {
        let channel = match view {
            View::U => 10,
            View::V => 810,
            View::X => 1800,
        };
        let geometry = DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1);
        let index = store.push(
            TriggerPrimitive::new(event, channel, view, start, 1, 100).with_generator("marley"),
        );
        let mut c = Cluster::build(id, store, vec![index], &geometry).unwrap();
        c.time_range = TimeRange::new(start, end);
        c.is_main_cluster = view == View::X;
        c
    }

    fn matcher(tolerance: u32) -> Matcher {
        Matcher::new(
            MatchingConfig::new().with_time_tolerance_ticks(tolerance),
            DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1),
        )
    }

    #[test]
    fn test_complete_match() {
        let mut store = TpStore::new();
        let x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let u = vec![cluster(&mut store, 1, View::U, 1, 1180, 1300)];
        let v = vec![cluster(&mut store, 2, View::V, 1, 900, 1050)];

        let outcome = matcher(50).match_clusters(&u, &v, &x);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].match_type, MatchType::Complete);
        assert_eq!(outcome.match_id_of(0), 0);
        assert_eq!(outcome.match_id_of(1), 0);
        assert_eq!(outcome.match_id_of(2), 0);
        assert_eq!(outcome.u_partner_of(0), 1);
        assert_eq!(outcome.v_partner_of(0), 2);
    }

    #[test]
    fn test_unmatched_main_emits_nothing() {
        let mut store = TpStore::new();
        let x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let u = vec![cluster(&mut store, 1, View::U, 1, 5000, 5100)];

        let outcome = matcher(10).match_clusters(&u, &[], &x);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.diagnostics.unmatched_mains, 1);
        assert_eq!(outcome.match_id_of(0), -1);
        assert_eq!(outcome.u_partner_of(0), -1);
    }

    #[test]
    fn test_incompatible_triple_falls_back_to_xu() {
        let mut store = TpStore::new();
        let x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let u = vec![cluster(&mut store, 1, View::U, 1, 1000, 1100)];
        let mut v = vec![cluster(&mut store, 2, View::V, 1, 1000, 1100)];
        v[0].detector = 7;

        let outcome = matcher(10).match_clusters(&u, &v, &x);
        assert_eq!(outcome.diagnostics.failed_spatial, 1);
        assert_eq!(outcome.matches[0].match_type, MatchType::XU);
        assert_eq!(outcome.match_id_of(2), -1);
        assert_eq!(outcome.v_partner_of(0), -1);
    }

    #[test]
    fn test_apa_filter() {
        let mut store = TpStore::new();
        let x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let mut u = vec![cluster(&mut store, 1, View::U, 1, 1000, 1100)];
        u[0].apa = 3;

        let outcome = matcher(10).match_clusters(&u, &[], &x);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.diagnostics.u_rejections.apa, 1);
        assert_eq!(outcome.diagnostics.u_event_delta.count(0), 1);
    }

    #[test]
    fn test_first_writer_wins() {
        let mut store = TpStore::new();
        let x = vec![
            cluster(&mut store, 0, View::X, 1, 1000, 1200),
            cluster(&mut store, 1, View::X, 1, 1010, 1150),
        ];
        let u = vec![cluster(&mut store, 2, View::U, 1, 1000, 1100)];

        let outcome = matcher(10).match_clusters(&u, &[], &x);
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.match_id_of(2), 0);
        assert_eq!(outcome.match_id_of(1), 1);
        assert_eq!(outcome.matches[1].u, Some(2));
    }

    #[test]
    fn test_annotate() {
        let mut store = TpStore::new();
        let mut x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let mut u = vec![cluster(&mut store, 1, View::U, 1, 1100, 1300)];

        let outcome = matcher(10).match_clusters(&u, &[], &x);
        outcome.annotate(&mut x);
        outcome.annotate(&mut u);
        assert_eq!(x[0].match_id, Some(0));
        assert_eq!(x[0].match_type, MatchType::XU);
        assert_eq!(x[0].matched_u, Some(1));
        assert_eq!(x[0].matched_v, None);
        assert_eq!(u[0].match_id, Some(0));
        assert_eq!(u[0].matched_u, None);
    }

    #[test]
    fn test_scan_stops_after_window() {
        let mut store = TpStore::new();
        let x = vec![cluster(&mut store, 0, View::X, 1, 1000, 1200)];
        let mut u: Vec<Cluster> = (0..20)
            .map(|i| cluster(&mut store, 1 + i, View::U, 1, 2000 + u64::from(i) * 10, 2005 + u64::from(i) * 10))
            .collect();
        sort_for_matching(&mut u);

        let outcome = matcher(10).match_clusters(&u, &[], &x);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.diagnostics.u_rejections.total(), 0);
    }

    #[test]
    fn test_deterministic() {
        let mut store = TpStore::new();
        let x = vec![
            cluster(&mut store, 0, View::X, 1, 1000, 1200),
            cluster(&mut store, 1, View::X, 2, 3000, 3200),
        ];
        let u = vec![cluster(&mut store, 2, View::U, 1, 1100, 1300)];
        let v = vec![cluster(&mut store, 3, View::V, 2, 3100, 3300)];

        let m = matcher(10);
        assert_eq!(m.match_clusters(&u, &v, &x), m.match_clusters(&u, &v, &x));
    }
}
