//! Per-file reconstruction: clustering, charge cuts, main selection and
//! matching.
//!
//! Events are processed in ascending id; within an event the planes run in
//! U, V, X order (or concurrently when `parallel_planes` is set). Cluster
//! ids come from one dense per-file counter and are assigned after any
//! parallel section, so they do not depend on scheduling.

use crate::clustering::TpClustering;
use crate::config::PipelineConfig;
use crate::diagnostics::MatchDiagnostics;
use crate::join::{join_match, JoinedCluster};
use crate::matching::{sort_for_matching, Match, MatchOutcome, Matcher};
use crate::selection::select_main_clusters;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tpreco_core::cluster::{Cluster, ClusterId};
use tpreco_core::clustering::ClusteringStatistics;
use tpreco_core::error::{ClusteringError, Error, Result};
use tpreco_core::store::{TpIndex, TpStore};
use tpreco_core::tp::View;

/// Clusters of one plane for a whole file.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneClusters {
    /// Plane.
    pub view: View,
    /// Clusters that passed the charge cut, in id order.
    pub kept: Vec<Cluster>,
    /// Clusters that failed the charge cut, in id order.
    pub discarded: Vec<Cluster>,
}

impl PlaneClusters {
    fn new(view: View) -> Self {
        Self {
            view,
            kept: Vec::new(),
            discarded: Vec::new(),
        }
    }
}

/// Counters for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    /// Events seen.
    pub events: usize,
    /// (event, plane) pairs abandoned on malformed input.
    pub abandoned_planes: usize,
    /// Clusters that passed the charge cut.
    pub kept_clusters: usize,
    /// Clusters that failed the charge cut.
    pub discarded_clusters: usize,
    /// Main clusters over all planes.
    pub main_clusters: usize,
    /// Engine counters summed over all planes.
    pub clustering: ClusteringStatistics,
}

impl PipelineStatistics {
    /// Adds all counters of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.abandoned_planes += other.abandoned_planes;
        self.kept_clusters += other.kept_clusters;
        self.discarded_clusters += other.discarded_clusters;
        self.main_clusters += other.main_clusters;
        self.clustering += other.clustering;
    }
}

/// Everything reconstructed from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReconstruction {
    planes: [PlaneClusters; 3],
    outcome: MatchOutcome,
    statistics: PipelineStatistics,
}

impl FileReconstruction {
    /// Clusters of a plane.
    #[must_use]
    pub fn plane(&self, view: View) -> &PlaneClusters {
        &self.planes[view.index()]
    }

    /// Planes in U, V, X order.
    #[must_use]
    pub fn planes(&self) -> &[PlaneClusters; 3] {
        &self.planes
    }

    /// Emitted matches, indexed by `match_id`.
    #[must_use]
    pub fn matches(&self) -> &[Match] {
        &self.outcome.matches
    }

    /// Full matcher output.
    #[must_use]
    pub fn outcome(&self) -> &MatchOutcome {
        &self.outcome
    }

    /// Matcher counters.
    #[must_use]
    pub fn diagnostics(&self) -> &MatchDiagnostics {
        &self.outcome.diagnostics
    }

    /// Pipeline counters.
    #[must_use]
    pub fn statistics(&self) -> &PipelineStatistics {
        &self.statistics
    }

    /// Kept cluster by id.
    #[must_use]
    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.planes.iter().find_map(|plane| {
            plane
                .kept
                .binary_search_by_key(&id, |c| c.cluster_id)
                .ok()
                .map(|i| &plane.kept[i])
        })
    }

    /// Total clusters, kept and discarded.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.planes
            .iter()
            .map(|p| p.kept.len() + p.discarded.len())
            .sum()
    }

    /// Joins every match, restamping member TPs to the X event.
    ///
    /// # Errors
    /// Fails if `store` is not the store this reconstruction was built from.
    pub fn join_matches(&self, store: &mut TpStore) -> Result<Vec<JoinedCluster>> {
        let mut joined = Vec::with_capacity(self.outcome.matches.len());
        for m in &self.outcome.matches {
            let x = self.cluster(m.x).ok_or(Error::UnknownCluster(m.x))?;
            let u = m.u.and_then(|id| self.cluster(id));
            let v = m.v.and_then(|id| self.cluster(id));
            joined.push(join_match(store, m, x, u, v)?);
        }
        Ok(joined)
    }
}

type PlaneGroups = (View, std::result::Result<Vec<Vec<TpIndex>>, ClusteringError>, ClusteringStatistics);

fn cluster_plane(engine: &TpClustering, store: &TpStore, event: u32, view: View) -> PlaneGroups {
    let indices = store.plane_indices(event, view);
    let mut state = engine.create_state();
    let groups = engine.cluster(store, &indices, &mut state);
    (view, groups, engine.statistics(&state))
}

/// Reconstructs one file.
///
/// Malformed input abandons only the affected (event, plane) with a
/// warning.
///
/// # Errors
/// Returns an error only for an invalid configuration.
pub fn reconstruct_file(store: &TpStore, config: &PipelineConfig) -> Result<FileReconstruction> {
    config.validate()?;
    let geometry = &config.geometry;
    let engine = TpClustering::new(config.clustering.clone(), geometry.clone());

    let mut planes = View::ALL.map(PlaneClusters::new);
    let mut statistics = PipelineStatistics::default();
    let mut next_id: ClusterId = 0;

    for event in store.event_ids() {
        statistics.events += 1;
        let results: Vec<PlaneGroups> = if config.parallel_planes {
            View::ALL
                .par_iter()
                .map(|&view| cluster_plane(&engine, store, event, view))
                .collect()
        } else {
            View::ALL
                .iter()
                .map(|&view| cluster_plane(&engine, store, event, view))
                .collect()
        };

        for (view, groups, plane_stats) in results {
            statistics.clustering += plane_stats;
            let groups = match groups {
                Ok(groups) => groups,
                Err(e) => {
                    warn!("event {event}, plane {view}: abandoned: {e}");
                    statistics.abandoned_planes += 1;
                    continue;
                }
            };

            let built: Result<Vec<Cluster>> = groups
                .into_iter()
                .zip(next_id..)
                .map(|(tps, id)| Cluster::build(id, store, tps, geometry))
                .collect();
            let clusters = match built {
                Ok(clusters) => clusters,
                Err(e) => {
                    warn!("event {event}, plane {view}: abandoned: {e}");
                    statistics.abandoned_planes += 1;
                    continue;
                }
            };
            next_id += clusters.len() as ClusterId;

            let plane = &mut planes[view.index()];
            for cluster in clusters {
                if config.cuts.passes(view, cluster.total_charge, geometry) {
                    plane.kept.push(cluster);
                } else {
                    plane.discarded.push(cluster);
                }
            }
        }
        debug!("event {event}: {next_id} clusters so far");
    }

    for plane in &mut planes {
        statistics.main_clusters += select_main_clusters(&mut plane.kept);
        sort_for_matching(&mut plane.kept);
        statistics.kept_clusters += plane.kept.len();
        statistics.discarded_clusters += plane.discarded.len();
    }

    let matcher = Matcher::new(config.matching.clone(), geometry.clone());
    let [u, v, x] = &planes;
    let outcome = matcher.match_clusters(&u.kept, &v.kept, &x.kept);

    for plane in &mut planes {
        outcome.annotate(&mut plane.kept);
        plane.kept.sort_by_key(|c| c.cluster_id);
    }

    debug!(
        "file: {} events, {} clusters kept, {} discarded, {} matches",
        statistics.events,
        statistics.kept_clusters,
        statistics.discarded_clusters,
        outcome.matches.len()
    );

    Ok(FileReconstruction {
        planes,
        outcome,
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CutConfig;
    use tpreco_core::clustering::ClusteringConfig;
    use tpreco_core::geometry::DetectorGeometry;
    use tpreco_core::tp::TriggerPrimitive;

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_geometry(DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1))
            .with_clustering(ClusteringConfig::new().with_tick_limit(5))
    }

    fn event_tps(event: u32, t0: u64) -> Vec<TriggerPrimitive> {
        vec![
            TriggerPrimitive::new(event, 1800, View::X, t0, 10, 900).with_generator("marley"),
            TriggerPrimitive::new(event, 1801, View::X, t0 + 2, 10, 900).with_generator("marley"),
            TriggerPrimitive::new(event, 100, View::U, t0 + 1, 10, 400).with_generator("marley"),
            TriggerPrimitive::new(event, 900, View::V, t0 + 3, 10, 400).with_generator("marley"),
            TriggerPrimitive::new(event, 2300, View::X, t0 + 500, 3, 50),
        ]
    }

    #[test]
    fn test_reconstruct_two_events() {
        let store: TpStore = event_tps(1, 1000)
            .into_iter()
            .chain(event_tps(2, 9000))
            .collect();
        let result = reconstruct_file(&store, &config()).unwrap();

        assert_eq!(result.statistics().events, 2);
        assert_eq!(result.cluster_count(), 8);
        assert_eq!(result.matches().len(), 2);
        assert!(result
            .matches()
            .iter()
            .all(|m| m.match_type == tpreco_core::cluster::MatchType::Complete));

        let mut ids: Vec<ClusterId> = result
            .planes()
            .iter()
            .flat_map(|p| p.kept.iter().chain(&p.discarded))
            .map(|c| c.cluster_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());

        let x = result.plane(View::X);
        assert_eq!(x.kept.iter().filter(|c| c.is_main_cluster).count(), 2);
        assert!(x.kept.iter().filter(|c| !c.is_main_cluster).all(|c| c.match_id.is_none()));
    }

    #[test]
    fn test_cut_moves_clusters_to_discarded() {
        let store: TpStore = event_tps(1, 1000).into_iter().collect();
        let cfg = config().with_cuts(CutConfig {
            adc_integral_cut_collection: 100,
            adc_integral_cut_induction: 1000,
            energy_cut: None,
        });
        let result = reconstruct_file(&store, &cfg).unwrap();

        assert_eq!(result.plane(View::X).kept.len(), 1);
        assert_eq!(result.plane(View::X).discarded.len(), 1);
        assert_eq!(result.plane(View::U).discarded.len(), 1);
        assert_eq!(result.plane(View::V).discarded.len(), 1);
        assert!(result.matches().is_empty());
        assert_eq!(result.diagnostics().unmatched_mains, 1);
    }

    #[test]
    fn test_malformed_plane_is_abandoned() {
        let mut tps = event_tps(1, 1000);
        // Channel 50 is a U wire stored as X.
        tps.push(TriggerPrimitive::new(1, 50, View::X, 1000, 2, 10));
        let store: TpStore = tps.into_iter().collect();
        let result = reconstruct_file(&store, &config()).unwrap();

        assert_eq!(result.statistics().abandoned_planes, 1);
        assert!(result.plane(View::X).kept.is_empty());
        assert_eq!(result.plane(View::U).kept.len(), 1);
        assert_eq!(result.plane(View::U).kept[0].cluster_id, 0);
        assert_eq!(result.plane(View::V).kept[0].cluster_id, 1);
    }

    #[test]
    fn test_parallel_planes_give_identical_ids() {
        let store: TpStore = event_tps(1, 1000)
            .into_iter()
            .chain(event_tps(2, 5000))
            .chain(event_tps(3, 9000))
            .collect();
        let serial = reconstruct_file(&store, &config()).unwrap();
        let parallel = reconstruct_file(&store, &config().with_parallel_planes(true)).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_join_matches_restamps() {
        let mut tps = event_tps(1, 1000);
        // Drifted U TP: same time, wrong event.
        tps[2].event = 2;
        let mut store: TpStore = tps.into_iter().collect();
        let result = reconstruct_file(&store, &config()).unwrap();
        // U is on event 2 so only X+V can match.
        assert_eq!(result.matches().len(), 1);
        assert_eq!(result.diagnostics().u_event_delta.count(1), 1);

        let joined = result.join_matches(&mut store).unwrap();
        assert_eq!(joined.len(), 1);
        assert!(joined[0].tps.iter().all(|&i| store[i].event == 1));
    }
}
