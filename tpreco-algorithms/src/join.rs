//! Joining the clusters of a match into one synthetic cluster.

use crate::matching::Match;
use serde::{Deserialize, Serialize};
use tpreco_core::cluster::{Cluster, ClusterId, ClusterTruth, MatchId, MatchType};
use tpreco_core::error::{Error, Result};
use tpreco_core::range::TimeRange;
use tpreco_core::store::{TpIndex, TpStore};

/// Union of the clusters of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedCluster {
    /// Match this cluster was joined from.
    pub match_id: MatchId,
    /// Composition of the match.
    pub match_type: MatchType,
    /// Event of the X cluster; every member TP carries it after the join.
    pub event: u32,
    /// APA of the X cluster.
    pub apa: u32,
    /// Constituent X cluster.
    pub x: ClusterId,
    /// Constituent U cluster.
    pub u: Option<ClusterId>,
    /// Constituent V cluster.
    pub v: Option<ClusterId>,
    /// Member TPs: X members, then U, then V.
    pub tps: Vec<TpIndex>,
    /// Union of the constituent time ranges.
    pub time_range: TimeRange,
    /// Sum of constituent charges.
    pub total_charge: u64,
    /// Sum of constituent energies (MeV).
    pub total_energy: f64,
    /// Truth of the X cluster.
    pub truth: ClusterTruth,
}

/// Restamps the event of every listed TP.
///
/// The single place where reconstruction mutates a TP. Returns the number
/// of TPs whose event actually changed.
///
/// # Errors
/// Returns [`Error::UnknownTp`] for an index outside the store; TPs before
/// it are already restamped.
pub fn stamp_match_event(store: &mut TpStore, tps: &[TpIndex], event: u32) -> Result<usize> {
    let mut changed = 0;
    for &index in tps {
        let previous = store.get(index).ok_or(Error::UnknownTp(index.0))?.event;
        if previous != event {
            store.restamp_event(index, event)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Joins the clusters of `m` and restamps their TPs to the X event.
///
/// # Errors
/// Fails if the supplied clusters are not the ones the match names, or if
/// a member TP is missing from the store.
pub fn join_match(
    store: &mut TpStore,
    m: &Match,
    x: &Cluster,
    u: Option<&Cluster>,
    v: Option<&Cluster>,
) -> Result<JoinedCluster> {
    check_constituent(m.x, Some(x))?;
    if let Some(id) = m.u {
        check_constituent(id, u)?;
    }
    if let Some(id) = m.v {
        check_constituent(id, v)?;
    }
    let u = m.u.and(u);
    let v = m.v.and(v);

    let mut tps = x.tps().to_vec();
    let mut time_range = x.time_range;
    let mut total_charge = x.total_charge;
    let mut total_energy = x.total_energy;
    for partner in [u, v].into_iter().flatten() {
        tps.extend_from_slice(partner.tps());
        time_range = time_range.union(&partner.time_range);
        total_charge += partner.total_charge;
        total_energy += partner.total_energy;
    }

    stamp_match_event(store, &tps, x.event)?;

    Ok(JoinedCluster {
        match_id: m.match_id,
        match_type: m.match_type,
        event: x.event,
        apa: x.apa,
        x: m.x,
        u: m.u,
        v: m.v,
        tps,
        time_range,
        total_charge,
        total_energy,
        truth: x.truth.clone(),
    })
}

fn check_constituent(expected: ClusterId, cluster: Option<&Cluster>) -> Result<()> {
    match cluster {
        Some(c) if c.cluster_id == expected => Ok(()),
        _ => Err(Error::UnknownCluster(expected)),
    }
}
