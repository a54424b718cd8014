//! Closed time intervals in TDC ticks.

use serde::{Deserialize, Serialize};

/// Closed interval `[start, end]` in TDC ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// First tick (inclusive).
    pub start: u64,
    /// Last tick (inclusive).
    pub end: u64,
}

impl TimeRange {
    /// Creates a range; `end` is clamped so the range is never inverted.
    #[inline]
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Separation between two ranges, zero when they overlap or touch.
    #[inline]
    #[must_use]
    pub fn gap(&self, other: &Self) -> u64 {
        if other.start > self.end {
            other.start - self.end
        } else if self.start > other.end {
            self.start - other.end
        } else {
            0
        }
    }

    /// Overlap test with a symmetric tolerance:
    /// `a.end + tol >= b.start && b.end + tol >= a.start`.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self, tolerance: u64) -> bool {
        self.end.saturating_add(tolerance) >= other.start
            && other.end.saturating_add(tolerance) >= self.start
    }

    /// Smallest range covering both.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Range length in ticks.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true for a single-tick range.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}
