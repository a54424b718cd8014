//! Arena of trigger primitives for one input file.
//!
//! TPs are owned here and addressed by [`TpIndex`]. Clusters and matches
//! only hold indices, so the store must outlive everything built from it.

use crate::error::{Error, Result};
use crate::tp::{TriggerPrimitive, View};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Index;

/// Non-owning reference to a TP in a [`TpStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TpIndex(pub u32);

impl TpIndex {
    /// Position in the arena.
    #[inline]
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Per-file TP arena with an event index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TpStore {
    tps: Vec<TriggerPrimitive>,
    events: BTreeMap<u32, Vec<TpIndex>>,
}

impl TpStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tps: Vec::with_capacity(capacity),
            events: BTreeMap::new(),
        }
    }

    /// Adds a TP and returns its index.
    ///
    /// # Panics
    /// Panics if the store already holds `u32::MAX` TPs.
    pub fn push(&mut self, tp: TriggerPrimitive) -> TpIndex {
        let index = TpIndex(u32::try_from(self.tps.len()).expect("TP store index overflow"));
        self.events.entry(tp.event).or_default().push(index);
        self.tps.push(tp);
        index
    }

    /// Returns the TP at `index`, if present.
    #[inline]
    #[must_use]
    pub fn get(&self, index: TpIndex) -> Option<&TriggerPrimitive> {
        self.tps.get(index.as_usize())
    }

    /// Number of stored TPs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tps.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tps.is_empty()
    }

    /// Iterates over all TPs with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (TpIndex, &TriggerPrimitive)> {
        self.tps.iter().enumerate().map(|(i, tp)| {
            #[allow(clippy::cast_possible_truncation)]
            let index = TpIndex(i as u32);
            (index, tp)
        })
    }

    /// Event ids present in the store, ascending.
    pub fn event_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.events.keys().copied()
    }

    /// Number of distinct events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Indices of an event's TPs in ingestion order.
    #[must_use]
    pub fn event_indices(&self, event: u32) -> &[TpIndex] {
        self.events.get(&event).map_or(&[], Vec::as_slice)
    }

    /// Indices of one plane of one event, sorted by `time_start`.
    ///
    /// The sort is stable, so TPs starting on the same tick keep their
    /// ingestion order.
    #[must_use]
    pub fn plane_indices(&self, event: u32, view: View) -> Vec<TpIndex> {
        let mut indices: Vec<TpIndex> = self
            .event_indices(event)
            .iter()
            .copied()
            .filter(|&i| self[i].view == view)
            .collect();
        indices.sort_by_key(|&i| self[i].time_start);
        indices
    }

    /// Resolves a list of indices.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTp`] for the first index outside the store.
    pub fn resolve<'a>(&'a self, indices: &[TpIndex]) -> Result<Vec<&'a TriggerPrimitive>> {
        indices
            .iter()
            .map(|&i| self.get(i).ok_or(Error::UnknownTp(i.0)))
            .collect()
    }

    /// Overwrites the event id of a stored TP.
    ///
    /// This is the only mutation the reconstruction performs on a TP: the
    /// match join uses it to put every member of a match on the X cluster's
    /// event. The event index is kept in step.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTp`] if `index` is outside the store.
    pub fn restamp_event(&mut self, index: TpIndex, event: u32) -> Result<()> {
        let tp = self
            .tps
            .get_mut(index.as_usize())
            .ok_or(Error::UnknownTp(index.0))?;
        let previous = tp.event;
        if previous == event {
            return Ok(());
        }
        tp.event = event;

        if let Some(members) = self.events.get_mut(&previous) {
            members.retain(|&i| i != index);
            if members.is_empty() {
                self.events.remove(&previous);
            }
        }
        let members = self.events.entry(event).or_default();
        let position = members.partition_point(|&i| i < index);
        members.insert(position, index);
        Ok(())
    }
}

impl Index<TpIndex> for TpStore {
    type Output = TriggerPrimitive;

    fn index(&self, index: TpIndex) -> &Self::Output {
        &self.tps[index.as_usize()]
    }
}

impl FromIterator<TriggerPrimitive> for TpStore {
    fn from_iter<I: IntoIterator<Item = TriggerPrimitive>>(iter: I) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}

impl Extend<TriggerPrimitive> for TpStore {
    fn extend<I: IntoIterator<Item = TriggerPrimitive>>(&mut self, iter: I) {
        for tp in iter {
            self.push(tp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> TpStore {
        vec![
            TriggerPrimitive::new(2, 1800, View::X, 300, 4, 10),
            TriggerPrimitive::new(1, 10, View::U, 200, 4, 10),
            TriggerPrimitive::new(2, 1801, View::X, 100, 4, 10),
            TriggerPrimitive::new(2, 1802, View::X, 100, 4, 10),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_event_index() {
        let store = sample_store();
        assert_eq!(store.len(), 4);
        assert_eq!(store.event_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.event_indices(2), &[TpIndex(0), TpIndex(2), TpIndex(3)]);
        assert!(store.event_indices(9).is_empty());
    }

    #[test]
    fn test_plane_indices_sorted_stable() {
        let store = sample_store();
        let x = store.plane_indices(2, View::X);
        assert_eq!(x, vec![TpIndex(2), TpIndex(3), TpIndex(0)]);
        assert!(store.plane_indices(2, View::U).is_empty());
    }

    #[test]
    fn test_restamp_event_moves_index() {
        let mut store = sample_store();
        store.restamp_event(TpIndex(1), 2).unwrap();
        assert_eq!(store[TpIndex(1)].event, 2);
        assert_eq!(store.event_ids().collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            store.event_indices(2),
            &[TpIndex(0), TpIndex(1), TpIndex(2), TpIndex(3)]
        );
        assert!(store.restamp_event(TpIndex(42), 1).is_err());
    }

    #[test]
    fn test_resolve_unknown() {
        let store = sample_store();
        assert!(store.resolve(&[TpIndex(0), TpIndex(3)]).is_ok());
        assert!(matches!(
            store.resolve(&[TpIndex(7)]),
            Err(Error::UnknownTp(7))
        ));
    }
}
