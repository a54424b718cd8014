use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use tpreco_algorithms::{
    reconstruct_file, ClusteringConfig, CutConfig, MatchingConfig, PipelineConfig, TpClustering,
};
use tpreco_core::cluster::{Cluster, MatchType};
use tpreco_core::geometry::DetectorGeometry;
use tpreco_core::store::{TpIndex, TpStore};
use tpreco_core::tp::{TriggerPrimitive, View};

fn random_store(seed: u64, events: u32, per_event: usize) -> TpStore {
    let geometry = DetectorGeometry::default();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = TpStore::new();
    let generators = ["marley", "UNKNOWN", "Ar39GenInLAr", "marley"];
    for event in 0..events {
        for _ in 0..per_event {
            let apa = rng.gen_range(0..2u32);
            let local = rng.gen_range(0..geometry.channels_per_apa);
            let channel = apa * geometry.channels_per_apa + local;
            let view = geometry.view_of(channel).unwrap();
            let tp = TriggerPrimitive::new(
                event,
                channel,
                view,
                rng.gen_range(10_000..13_000u64),
                rng.gen_range(1..=8u32),
                rng.gen_range(50..5_050u32),
            )
            .with_generator(generators[rng.gen_range(0..generators.len())]);
            store.push(tp);
        }
    }
    store
}

fn config() -> PipelineConfig {
    PipelineConfig::new()
        .with_geometry(DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1))
        .with_clustering(ClusteringConfig::new().with_tick_limit(4).with_min_tps_to_cluster(2))
        .with_cuts(CutConfig {
            adc_integral_cut_induction: 3_000,
            adc_integral_cut_collection: 3_000,
            energy_cut: None,
        })
        .with_matching(MatchingConfig::new().with_time_tolerance_ticks(20))
}

fn all_clusters(result: &tpreco_algorithms::FileReconstruction) -> Vec<&Cluster> {
    result
        .planes()
        .iter()
        .flat_map(|p| p.kept.iter().chain(&p.discarded))
        .collect()
}

#[test]
fn test_clusters_partition_their_tps() {
    let store = random_store(7, 4, 600);
    let result = reconstruct_file(&store, &config()).unwrap();
    let clusters = all_clusters(&result);
    assert!(!clusters.is_empty());

    let mut seen = BTreeSet::new();
    for cluster in &clusters {
        assert!(cluster.len() >= 2);
        for &index in cluster.tps() {
            assert!(seen.insert(index), "TP {:?} appears in two clusters", index);
            assert_eq!(store[index].event, cluster.event);
            assert_eq!(store[index].view, cluster.view);
        }
    }
}

#[test]
fn test_fractions_are_exact_ratios() {
    let store = random_store(11, 2, 800);
    let result = reconstruct_file(&store, &config()).unwrap();
    for cluster in all_clusters(&result) {
        let n = cluster.len() as f64;
        let signal = cluster
            .tps()
            .iter()
            .filter(|&&i| store[i].truth.is_signal())
            .count() as f64;
        let known = cluster
            .tps()
            .iter()
            .filter(|&&i| store[i].truth.is_known())
            .count() as f64;
        assert_eq!(cluster.marley_tp_fraction, signal / n);
        assert_eq!(cluster.generator_tp_fraction, known / n);
    }
}

#[test]
fn test_one_main_per_event_and_plane() {
    let store = random_store(3, 5, 500);
    let result = reconstruct_file(&store, &config()).unwrap();
    let mut mains: BTreeMap<(u32, View), usize> = BTreeMap::new();
    for plane in result.planes() {
        assert!(plane.discarded.iter().all(|c| !c.is_main_cluster));
        for cluster in plane.kept.iter().filter(|c| c.is_main_cluster) {
            *mains.entry((cluster.event, cluster.view)).or_insert(0) += 1;
        }
    }
    assert!(mains.values().all(|&n| n == 1));
}

#[test]
fn test_ids_are_dense() {
    let store = random_store(5, 3, 700);
    let result = reconstruct_file(&store, &config()).unwrap();

    let mut ids: Vec<u32> = all_clusters(&result).iter().map(|c| c.cluster_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..ids.len() as u32).collect::<Vec<_>>());

    for (i, m) in result.matches().iter().enumerate() {
        assert_eq!(m.match_id as usize, i);
    }
}

#[test]
fn test_complete_matches_are_consistent() {
    let store = random_store(13, 6, 900);
    let cfg = config();
    let result = reconstruct_file(&store, &cfg).unwrap();
    let tolerance = cfg.geometry.tpc_to_tdc(u64::from(cfg.matching.time_tolerance_ticks));

    for m in result.matches() {
        let x = result.cluster(m.x).unwrap();
        assert!(x.is_main_cluster);
        assert_eq!(x.view, View::X);
        let partners: Vec<&Cluster> = m
            .u
            .into_iter()
            .chain(m.v)
            .map(|id| result.cluster(id).unwrap())
            .collect();
        for p in &partners {
            assert_eq!(p.event, x.event);
            assert_eq!(p.apa, x.apa);
            assert!(x.time_range.overlaps(&p.time_range, tolerance));
        }
        if m.match_type == MatchType::Complete {
            assert_eq!(partners.len(), 2);
            assert!(partners[0].time_range.overlaps(&x.time_range, tolerance));
        }
    }

    let d = result.diagnostics();
    assert_eq!(d.total_matches() + d.unmatched_mains, d.main_x_clusters);
}

#[test]
fn test_rerun_is_identical() {
    let store = random_store(17, 4, 600);
    let first = reconstruct_file(&store, &config()).unwrap();
    let second = reconstruct_file(&store, &config()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_separated_bursts_form_separate_clusters() {
    // Bursts far apart in time: every earlier candidate has aged out.
    let geometry = DetectorGeometry::default().with_tdc_ticks_per_tpc_tick(1);
    let mut store = TpStore::new();
    for burst in 0..20u64 {
        for k in 0..5u32 {
            store.push(TriggerPrimitive::new(
                1,
                1700 + k,
                View::X,
                burst * 1_000 + u64::from(k),
                3,
                100,
            ));
        }
    }
    let engine = TpClustering::new(ClusteringConfig::new().with_tick_limit(4), geometry);
    let mut state = engine.create_state();
    let clusters = engine
        .cluster(&store, &store.plane_indices(1, View::X), &mut state)
        .unwrap();

    assert_eq!(clusters.len(), 20);
    for (burst, cluster) in clusters.iter().enumerate() {
        let expected: Vec<TpIndex> = (0..5).map(|k| TpIndex(burst as u32 * 5 + k)).collect();
        assert_eq!(cluster, &expected);
    }
}
