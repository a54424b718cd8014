//! Channel-adjacency and time-gap predicates between two TPs.

use tpreco_core::geometry::DetectorGeometry;
use tpreco_core::tp::{TriggerPrimitive, View};

/// Channel-adjacency predicate.
///
/// Both TPs must sit on the same APA and view. Channels within
/// `channel_limit` are adjacent. Induction planes wrap: the two ends of the
/// plane are adjacent when `d >= W - channel_limit`. On the collection
/// plane, TPs on different drift volumes are never adjacent.
#[must_use]
pub fn channels_adjacent(
    a: &TriggerPrimitive,
    b: &TriggerPrimitive,
    geometry: &DetectorGeometry,
    channel_limit: u32,
) -> bool {
    if a.view != b.view || a.apa(geometry) != b.apa(geometry) {
        return false;
    }

    let distance = a.channel.abs_diff(b.channel);
    match a.view {
        View::U | View::V => {
            distance <= channel_limit
                || distance >= geometry.plane_width(a.view).saturating_sub(channel_limit)
        }
        View::X => {
            geometry.x_drift_volume(a.detector_channel) == geometry.x_drift_volume(b.detector_channel)
                && distance <= channel_limit
        }
    }
}

/// Separation of the two pulse intervals in TDC ticks, zero on overlap.
#[inline]
#[must_use]
pub fn time_gap(a: &TriggerPrimitive, b: &TriggerPrimitive, geometry: &DetectorGeometry) -> u64 {
    a.time_range(geometry).gap(&b.time_range(geometry))
}
