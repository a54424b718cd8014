//! Matching diagnostics.
//!
//! All counters have count semantics so per-file diagnostics can be merged
//! in any order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tpreco_core::tp::View;

/// Why a candidate cluster was not bound to a main X cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Time ranges do not overlap within tolerance.
    Time,
    /// Different event.
    Event,
    /// Different APA.
    Apa,
}

/// Histogram of `candidate.event - x.event`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDeltaHistogram {
    buckets: BTreeMap<i64, u64>,
}

impl EventDeltaHistogram {
    /// Adds one entry for `delta`.
    pub fn record(&mut self, delta: i64) {
        *self.buckets.entry(delta).or_insert(0) += 1;
    }

    /// Entries in the `delta` bucket.
    #[must_use]
    pub fn count(&self, delta: i64) -> u64 {
        self.buckets.get(&delta).copied().unwrap_or(0)
    }

    /// Total number of entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// Returns true when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Adds all entries of `other`.
    pub fn merge(&mut self, other: &Self) {
        for (&delta, &count) in &other.buckets {
            *self.buckets.entry(delta).or_insert(0) += count;
        }
    }

    /// The `n` fullest buckets, largest first; ties ordered by delta.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<(i64, u64)> {
        let mut buckets: Vec<(i64, u64)> = self.buckets.iter().map(|(&d, &c)| (d, c)).collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        buckets.truncate(n);
        buckets
    }
}

/// Per-reason rejection counts for one induction plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneRejections {
    /// Failed the time-overlap filter.
    pub time: u64,
    /// Failed the event filter.
    pub event: u64,
    /// Failed the APA filter.
    pub apa: u64,
}

impl PlaneRejections {
    /// Counts one rejection.
    pub fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::Time => self.time += 1,
            RejectReason::Event => self.event += 1,
            RejectReason::Apa => self.apa += 1,
        }
    }

    /// Total rejections.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.time + self.event + self.apa
    }

    fn merge(&mut self, other: &Self) {
        self.time += other.time;
        self.event += other.event;
        self.apa += other.apa;
    }
}

/// Matcher health counters for one file or a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDiagnostics {
    /// Main X clusters considered.
    pub main_x_clusters: u64,
    /// X+U+V matches.
    pub complete_matches: u64,
    /// X+U matches.
    pub xu_matches: u64,
    /// X+V matches.
    pub xv_matches: u64,
    /// Main X clusters without any partner.
    pub unmatched_mains: u64,
    /// Triples that failed the compatibility hook.
    pub failed_spatial: u64,
    /// U candidates rejected, per reason.
    pub u_rejections: PlaneRejections,
    /// V candidates rejected, per reason.
    pub v_rejections: PlaneRejections,
    /// Event deltas of U candidates that passed the time filter.
    pub u_event_delta: EventDeltaHistogram,
    /// Event deltas of V candidates that passed the time filter.
    pub v_event_delta: EventDeltaHistogram,
}

impl MatchDiagnostics {
    /// Creates empty diagnostics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejection counters of an induction plane, `None` for X.
    #[must_use]
    pub fn rejections(&self, view: View) -> Option<&PlaneRejections> {
        match view {
            View::U => Some(&self.u_rejections),
            View::V => Some(&self.v_rejections),
            View::X => None,
        }
    }

    pub(crate) fn record_rejection(&mut self, view: View, reason: RejectReason) {
        match view {
            View::U => self.u_rejections.record(reason),
            View::V => self.v_rejections.record(reason),
            View::X => {}
        }
    }

    pub(crate) fn record_event_delta(&mut self, view: View, delta: i64) {
        match view {
            View::U => self.u_event_delta.record(delta),
            View::V => self.v_event_delta.record(delta),
            View::X => {}
        }
    }

    /// Matches of any type.
    #[must_use]
    pub fn total_matches(&self) -> u64 {
        self.complete_matches + self.xu_matches + self.xv_matches
    }

    /// Adds all counters of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.main_x_clusters += other.main_x_clusters;
        self.complete_matches += other.complete_matches;
        self.xu_matches += other.xu_matches;
        self.xv_matches += other.xv_matches;
        self.unmatched_mains += other.unmatched_mains;
        self.failed_spatial += other.failed_spatial;
        self.u_rejections.merge(&other.u_rejections);
        self.v_rejections.merge(&other.v_rejections);
        self.u_event_delta.merge(&other.u_event_delta);
        self.v_event_delta.merge(&other.v_event_delta);
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl fmt::Display for MatchDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mains = self.main_x_clusters;
        writeln!(f, "Main X clusters:   {mains}")?;
        writeln!(
            f,
            "  complete (X+U+V): {} ({:.1}%)",
            self.complete_matches,
            percent(self.complete_matches, mains)
        )?;
        writeln!(
            f,
            "  partial X+U:      {} ({:.1}%)",
            self.xu_matches,
            percent(self.xu_matches, mains)
        )?;
        writeln!(
            f,
            "  partial X+V:      {} ({:.1}%)",
            self.xv_matches,
            percent(self.xv_matches, mains)
        )?;
        writeln!(
            f,
            "  unmatched:        {} ({:.1}%)",
            self.unmatched_mains,
            percent(self.unmatched_mains, mains)
        )?;
        writeln!(f, "Failed spatial:    {}", self.failed_spatial)?;
        for (name, rejections, histogram) in [
            ("U", &self.u_rejections, &self.u_event_delta),
            ("V", &self.v_rejections, &self.v_event_delta),
        ] {
            writeln!(
                f,
                "{name} rejections:      time={} event={} apa={}",
                rejections.time, rejections.event, rejections.apa
            )?;
            let top: Vec<String> = histogram
                .top(5)
                .into_iter()
                .map(|(delta, count)| format!("{delta:+}:{count}"))
                .collect();
            writeln!(f, "{name} event_delta:     [{}]", top.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_top() {
        let mut h = EventDeltaHistogram::default();
        for delta in [0, 0, 0, 1, -1, -1] {
            h.record(delta);
        }
        assert_eq!(h.count(0), 3);
        assert_eq!(h.count(7), 0);
        assert_eq!(h.total(), 6);
        assert_eq!(h.top(2), vec![(0, 3), (-1, 2)]);
    }

    #[test]
    fn test_merge_is_additive() {
        let mut a = MatchDiagnostics::new();
        a.main_x_clusters = 2;
        a.complete_matches = 1;
        a.record_rejection(View::U, RejectReason::Event);
        a.record_event_delta(View::U, 1);

        let mut b = MatchDiagnostics::new();
        b.main_x_clusters = 3;
        b.xv_matches = 2;
        b.record_rejection(View::U, RejectReason::Event);
        b.record_rejection(View::V, RejectReason::Apa);
        b.record_event_delta(View::U, 1);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.main_x_clusters, 5);
        assert_eq!(ab.total_matches(), 3);
        assert_eq!(ab.u_rejections.event, 2);
        assert_eq!(ab.v_rejections.apa, 1);
        assert_eq!(ab.u_event_delta.count(1), 2);
    }

    #[test]
    fn test_display_summary() {
        let mut d = MatchDiagnostics::new();
        d.main_x_clusters = 4;
        d.complete_matches = 1;
        d.unmatched_mains = 3;
        d.record_event_delta(View::V, -2);
        let text = d.to_string();
        assert!(text.contains("Main X clusters:   4"));
        assert!(text.contains("(25.0%)"));
        assert!(text.contains("(75.0%)"));
        assert!(text.contains("-2:1"));
    }
}
