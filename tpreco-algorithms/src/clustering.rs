//! Channel/time clustering of TPs on a single plane of a single event.
//!
//! Key characteristics:
//! - Single linear pass over time-sorted TPs
//! - Open candidates kept in creation order; the first one that accepts a
//!   TP takes it
//! - Same-wire veto: a candidate holding a TP on the same channel but
//!   further away in time than the tick limit can never take the new TP
//! - Candidates whose latest pulse ended more than the tick limit before
//!   the current TP are skipped; they cannot accept anything any more

use crate::adjacency::channels_adjacent;
use tpreco_core::clustering::{ClusteringConfig, ClusteringStatistics};
use tpreco_core::error::ClusteringError;
use tpreco_core::geometry::DetectorGeometry;
use tpreco_core::range::TimeRange;
use tpreco_core::store::{TpIndex, TpStore};
use tpreco_core::tp::TriggerPrimitive;

/// Open cluster candidate.
#[derive(Clone, Debug, Default)]
struct Candidate {
    /// Member indices with their pulse intervals (TDC).
    members: Vec<(TpIndex, TimeRange)>,
    /// Latest pulse end among members.
    latest_end: u64,
}

impl Candidate {
    fn start(index: TpIndex, range: TimeRange) -> Self {
        let mut members = Vec::with_capacity(8);
        members.push((index, range));
        Self {
            members,
            latest_end: range.end,
        }
    }

    fn push(&mut self, index: TpIndex, range: TimeRange) {
        self.members.push((index, range));
        self.latest_end = self.latest_end.max(range.end);
    }
}

/// Outcome of testing one TP against one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Accept,
    Veto,
    Reject,
}

/// Clustering state, reusable across events.
#[derive(Debug, Default)]
pub struct TpClusteringState {
    candidates: Vec<Candidate>,
    statistics: ClusteringStatistics,
}

impl TpClusteringState {
    /// Clears accumulated statistics.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.statistics = ClusteringStatistics::default();
    }
}

/// Per-plane channel/time clustering engine.
#[derive(Clone, Debug)]
pub struct TpClustering {
    config: ClusteringConfig,
    geometry: DetectorGeometry,
}

impl TpClustering {
    /// Create with custom configuration.
    #[must_use]
    pub fn new(config: ClusteringConfig, geometry: DetectorGeometry) -> Self {
        Self { config, geometry }
    }

    /// Algorithm name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        "ChannelTime"
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Geometry used for adjacency and unit conversion.
    #[must_use]
    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    /// Creates a fresh state.
    #[must_use]
    pub fn create_state(&self) -> TpClusteringState {
        TpClusteringState {
            candidates: Vec::with_capacity(64),
            statistics: ClusteringStatistics::default(),
        }
    }

    /// Statistics accumulated in `state`.
    #[must_use]
    pub fn statistics(&self, state: &TpClusteringState) -> ClusteringStatistics {
        state.statistics
    }

    /// Clusters one plane of one event.
    ///
    /// `tps` must be sorted by `time_start`. Returns the member lists of
    /// every candidate with at least `min_tps_to_cluster` TPs, in creation
    /// order. Each member list keeps insertion order.
    ///
    /// # Errors
    /// Fails before doing any work if the input spans several events or
    /// views, references unknown TPs, or holds a TP whose view disagrees
    /// with its channel.
    pub fn cluster(
        &self,
        store: &TpStore,
        tps: &[TpIndex],
        state: &mut TpClusteringState,
    ) -> Result<Vec<Vec<TpIndex>>, ClusteringError> {
        self.config.validate()?;
        self.check_input(store, tps)?;

        state.candidates.clear();
        if tps.is_empty() {
            return Ok(Vec::new());
        }

        let tick_limit = self.geometry.tpc_to_tdc(u64::from(self.config.tick_limit));

        for &index in tps {
            let tp = &store[index];
            let range = tp.time_range(&self.geometry);
            let mut taken = false;

            for candidate in &mut state.candidates {
                if candidate.latest_end.saturating_add(tick_limit) < range.start {
                    continue;
                }
                match self.verdict(store, candidate, tp, &range, tick_limit) {
                    Verdict::Accept => {
                        candidate.push(index, range);
                        taken = true;
                        break;
                    }
                    Verdict::Veto => state.statistics.same_wire_vetoes += 1,
                    Verdict::Reject => {}
                }
            }

            if !taken {
                state.candidates.push(Candidate::start(index, range));
                state.statistics.candidates_opened += 1;
            }
            state.statistics.tps_processed += 1;
        }

        let mut clusters = Vec::new();
        for candidate in state.candidates.drain(..) {
            if candidate.members.len() >= self.config.min_tps_to_cluster {
                clusters.push(candidate.members.into_iter().map(|(i, _)| i).collect());
            } else {
                state.statistics.candidates_discarded += 1;
            }
        }
        state.statistics.clusters_found += clusters.len();

        Ok(clusters)
    }

    /// Applies the same-wire veto and the adjacency acceptance rule.
    fn verdict(
        &self,
        store: &TpStore,
        candidate: &Candidate,
        tp: &TriggerPrimitive,
        range: &TimeRange,
        tick_limit: u64,
    ) -> Verdict {
        let mut accepts = false;
        for (member_index, member_range) in &candidate.members {
            let member = &store[*member_index];
            let gap = range.gap(member_range);
            if member.channel == tp.channel && gap > tick_limit {
                return Verdict::Veto;
            }
            if !accepts
                && gap <= tick_limit
                && channels_adjacent(tp, member, &self.geometry, self.config.channel_limit)
            {
                accepts = true;
            }
        }
        if accepts {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    fn check_input(&self, store: &TpStore, tps: &[TpIndex]) -> Result<(), ClusteringError> {
        let Some(&first_index) = tps.first() else {
            return Ok(());
        };
        let first = store
            .get(first_index)
            .ok_or(ClusteringError::UnknownTp(first_index.0))?;

        for &index in tps {
            let tp = store.get(index).ok_or(ClusteringError::UnknownTp(index.0))?;
            if tp.event != first.event {
                return Err(ClusteringError::MixedEvents {
                    first: first.event,
                    other: tp.event,
                });
            }
            if tp.view != first.view {
                return Err(ClusteringError::MixedViews {
                    first: first.view,
                    other: tp.view,
                });
            }
            if tp.validate(&self.geometry).is_err() {
                return Err(ClusteringError::InvalidView {
                    detector_channel: tp.detector_channel,
                    stored: tp.view,
                });
            }
        }
        Ok(())
    }
}

impl Default for TpClustering {
    fn default() -> Self {
        Self::new(ClusteringConfig::default(), DetectorGeometry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpreco_core::tp::View;

    fn unit_geometry() -> DetectorGeometry {
        DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1)
    }

    fn run(tps: Vec<TriggerPrimitive>, config: ClusteringConfig) -> Vec<Vec<TpIndex>> {
        let store: TpStore = tps.into_iter().collect();
        let engine = TpClustering::new(config, unit_geometry());
        let mut state = engine.create_state();
        let indices = store.plane_indices(1, store[TpIndex(0)].view);
        engine.cluster(&store, &indices, &mut state).unwrap()
    }

    #[test]
    fn test_tp_clustering_basic() {
        let tps = vec![
            TriggerPrimitive::new(1, 1800, View::X, 100, 2, 10),
            TriggerPrimitive::new(1, 1801, View::X, 101, 2, 10),
            TriggerPrimitive::new(1, 1900, View::X, 100, 2, 10),
            TriggerPrimitive::new(1, 1901, View::X, 102, 2, 10),
        ];
        let config = ClusteringConfig::new().with_tick_limit(2);
        let clusters = run(tps, config);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![TpIndex(0), TpIndex(1)]);
        assert_eq!(clusters[1], vec![TpIndex(2), TpIndex(3)]);
    }

    #[test]
    fn test_empty_input() {
        let engine = TpClustering::default();
        let mut state = engine.create_state();
        let clusters = engine.cluster(&TpStore::new(), &[], &mut state).unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_min_tps_discards_small_candidates() {
        let tps = vec![
            TriggerPrimitive::new(1, 1800, View::X, 100, 2, 10),
            TriggerPrimitive::new(1, 1801, View::X, 101, 2, 10),
            TriggerPrimitive::new(1, 2000, View::X, 100, 2, 10),
        ];
        let store: TpStore = tps.into_iter().collect();
        let engine = TpClustering::new(
            ClusteringConfig::new().with_min_tps_to_cluster(2),
            unit_geometry(),
        );
        let mut state = engine.create_state();
        let indices = store.plane_indices(1, View::X);
        let clusters = engine.cluster(&store, &indices, &mut state).unwrap();

        assert_eq!(clusters.len(), 1);
        let stats = engine.statistics(&state);
        assert_eq!(stats.tps_processed, 3);
        assert_eq!(stats.candidates_opened, 2);
        assert_eq!(stats.candidates_discarded, 1);
        assert_eq!(stats.clusters_found, 1);
    }

    #[test]
    fn test_first_accepting_candidate_wins() {
        // 1802 is adjacent to both open candidates; the older one takes it.
        let tps = vec![
            TriggerPrimitive::new(1, 1801, View::X, 100, 2, 10),
            TriggerPrimitive::new(1, 1803, View::X, 100, 2, 10),
            TriggerPrimitive::new(1, 1802, View::X, 101, 2, 10),
        ];
        let clusters = run(tps, ClusteringConfig::new());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![TpIndex(0), TpIndex(2)]);
        assert_eq!(clusters[1], vec![TpIndex(1)]);
    }

    #[test]
    fn test_rejects_mixed_input() {
        let store: TpStore = vec![
            TriggerPrimitive::new(1, 1800, View::X, 100, 2, 10),
            TriggerPrimitive::new(2, 1801, View::X, 101, 2, 10),
            TriggerPrimitive::new(1, 10, View::U, 101, 2, 10),
            TriggerPrimitive::new(1, 20, View::X, 101, 2, 10),
        ]
        .into_iter()
        .collect();
        let engine = TpClustering::default();
        let mut state = engine.create_state();

        assert!(matches!(
            engine.cluster(&store, &[TpIndex(0), TpIndex(1)], &mut state),
            Err(ClusteringError::MixedEvents { .. })
        ));
        assert!(matches!(
            engine.cluster(&store, &[TpIndex(0), TpIndex(2)], &mut state),
            Err(ClusteringError::MixedViews { .. })
        ));
        assert!(matches!(
            engine.cluster(&store, &[TpIndex(3)], &mut state),
            Err(ClusteringError::InvalidView { .. })
        ));
        assert!(matches!(
            engine.cluster(&store, &[TpIndex(9)], &mut state),
            Err(ClusteringError::UnknownTp(9))
        ));
    }

    #[test]
    fn test_invalid_min_tps() {
        let engine = TpClustering::new(
            ClusteringConfig::new().with_min_tps_to_cluster(0),
            unit_geometry(),
        );
        let mut state = engine.create_state();
        assert!(engine.cluster(&TpStore::new(), &[], &mut state).is_err());
    }

    #[test]
    fn test_aged_candidate_is_skipped_without_changing_result() {
        // The first candidate is long finished when the later TPs arrive.
        let tps = vec![
            TriggerPrimitive::new(1, 1800, View::X, 0, 2, 10),
            TriggerPrimitive::new(1, 1801, View::X, 500, 2, 10),
            TriggerPrimitive::new(1, 1802, View::X, 501, 2, 10),
        ];
        let clusters = run(tps, ClusteringConfig::new().with_tick_limit(3));
        assert_eq!(clusters, vec![vec![TpIndex(0)], vec![TpIndex(1), TpIndex(2)]]);
    }
}
