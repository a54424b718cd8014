//! Main-cluster selection.

use std::collections::BTreeMap;
use tpreco_core::cluster::Cluster;
use tpreco_core::tp::View;

/// Marks at most one main cluster per (event, view).
///
/// Only signal-labelled clusters compete; the largest `total_energy` wins
/// and the earlier cluster in slice order wins a tie. Any previous
/// `is_main_cluster` flag is cleared first. Returns the number of mains.
pub fn select_main_clusters(clusters: &mut [Cluster]) -> usize {
    // (event, view) -> (position, energy)
    let mut best: BTreeMap<(u32, View), (usize, f64)> = BTreeMap::new();

    for (position, cluster) in clusters.iter_mut().enumerate() {
        cluster.is_main_cluster = false;
        if !cluster.truth.is_signal() {
            continue;
        }
        let energy = cluster.total_energy;
        best.entry((cluster.event, cluster.view))
            .and_modify(|current| {
                if energy > current.1 {
                    *current = (position, energy);
                }
            })
            .or_insert((position, energy));
    }

    for &(position, _) in best.values() {
        clusters[position].is_main_cluster = true;
    }
    best.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpreco_core::geometry::DetectorGeometry;
    use tpreco_core::store::{TpIndex, TpStore};
    use tpreco_core::tp::TriggerPrimitive;

    fn build(store: &mut TpStore, id: u32, event: u32, channel: u32, view: View, adc: u32, generator: &str) -> Cluster {
        let index = store.push(
            TriggerPrimitive::new(event, channel, view, 100, 5, adc).with_generator(generator),
        );
        Cluster::build(id, store, vec![index], &DetectorGeometry::default()).unwrap()
    }

    #[test]
    fn test_largest_signal_energy_wins() {
        let mut store = TpStore::new();
        let mut clusters = vec![
            build(&mut store, 0, 1, 1800, View::X, 500, "marley"),
            build(&mut store, 1, 1, 1810, View::X, 9000, "Ar39GenInLAr"),
            build(&mut store, 2, 1, 1820, View::X, 800, "MARLEY"),
            build(&mut store, 3, 1, 10, View::U, 100, "marley"),
        ];

        assert_eq!(select_main_clusters(&mut clusters), 2);
        assert!(!clusters[0].is_main_cluster);
        assert!(!clusters[1].is_main_cluster);
        assert!(clusters[2].is_main_cluster);
        assert!(clusters[3].is_main_cluster);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let mut store = TpStore::new();
        let mut clusters = vec![
            build(&mut store, 0, 1, 1800, View::X, 500, "marley"),
            build(&mut store, 1, 1, 1900, View::X, 500, "marley"),
        ];
        select_main_clusters(&mut clusters);
        assert!(clusters[0].is_main_cluster);
        assert!(!clusters[1].is_main_cluster);
    }

    #[test]
    fn test_no_signal_no_main() {
        let mut store = TpStore::new();
        let mut clusters = vec![
            build(&mut store, 0, 1, 1800, View::X, 500, "UNKNOWN"),
            build(&mut store, 1, 2, 1900, View::X, 500, "APA"),
        ];
        clusters[0].is_main_cluster = true;
        assert_eq!(select_main_clusters(&mut clusters), 0);
        assert!(clusters.iter().all(|c| !c.is_main_cluster));
        assert_eq!(store.len(), 2);
        assert_eq!(clusters[1].tps(), &[TpIndex(1)]);
    }

    #[test]
    fn test_one_main_per_event() {
        let mut store = TpStore::new();
        let mut clusters = vec![
            build(&mut store, 0, 1, 1800, View::X, 500, "marley"),
            build(&mut store, 1, 2, 1800, View::X, 100, "marley"),
        ];
        assert_eq!(select_main_clusters(&mut clusters), 2);
        assert!(clusters.iter().all(|c| c.is_main_cluster));
    }
}
