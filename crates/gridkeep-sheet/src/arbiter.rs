//! Keep/veto arbiter - turns "deletion wins" into "edit wins" for raced rows and columns.
//!
//! Every cell or label write publishes a touch marker for the identities it
//! touched. Markers live in a replicated map, so they travel exactly like
//! the edit they accompany. When a remote batch of markers arrives, every
//! marked identity that is missing from its sequence had its deletion race
//! with the edit, and the deletion is reversed through the tracker. The
//! touch set is then cleared; it is a signalling channel, not document state.
//!
//! A marker counts as arrived when this replica has not seen it before, even
//! if a clear it never observed already outranks it in the map. Ops from one
//! replica are delivered in the order they were issued, so a per-replica
//! high-water mark is enough to tell new markers from redeliveries.

use crate::ids::{ColId, Identity, RowId};
use crate::tracker::{Reversal, StructuralTracker};
use gridkeep_core::{IdSequence, LwwMap, MapOp};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Replicated write to a touch set. The value names the touching replica.
pub type TouchOp<I> = MapOp<I, String>;

/// Recently touched identities of one axis.
#[derive(Clone, Debug, PartialEq)]
pub struct TouchSet<I: Identity> {
    markers: LwwMap<I, String>,
    /// Highest Lamport time integrated from each remote replica.
    seen: BTreeMap<String, u64>,
}

impl<I: Identity> TouchSet<I> {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            markers: LwwMap::new(replica_id),
            seen: BTreeMap::new(),
        }
    }

    /// Publish a marker for `id` attributed to this replica.
    pub fn touch(&mut self, id: &I) -> TouchOp<I> {
        let replica = self.markers.replica_id().to_string();
        self.markers.set(id.clone(), replica)
    }

    /// Drop the marker for `id`, if any.
    pub fn forget(&mut self, id: &I) -> Option<TouchOp<I>> {
        self.markers.delete(id)
    }

    pub fn is_touched(&self, id: &I) -> bool {
        self.markers.has(id)
    }

    /// Replica that last touched `id`.
    pub fn toucher(&self, id: &I) -> Option<&str> {
        self.markers.get(id).map(|replica| replica.as_str())
    }

    /// Identities with a live marker.
    pub fn marked(&self) -> Vec<I> {
        self.markers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Integrate a marker write from another replica.
    ///
    /// Returns `true` when `op` is a marker this replica had not seen yet,
    /// whether or not it outranks the local entry for its key.
    pub fn apply(&mut self, op: &TouchOp<I>) -> bool {
        let mark = self.seen.entry(op.stamp.replica.clone()).or_insert(0);
        let fresh = op.stamp.lamport > *mark;
        if fresh {
            *mark = op.stamp.lamport;
        }
        self.markers.apply(op);
        fresh && op.is_put()
    }

    pub fn take_delta(&mut self) -> Vec<TouchOp<I>> {
        self.markers.take_delta()
    }

    /// Run one reconciliation pass.
    ///
    /// `arrived` holds the identities whose markers were new in the remote
    /// batch. Together with every marker still live they form the candidates;
    /// each candidate absent from `sequence` gets its last deletion reversed.
    /// The touch set is cleared afterwards.
    pub fn reconcile(
        &mut self,
        arrived: &[I],
        sequence: &mut IdSequence<I>,
        tracker: &mut StructuralTracker<I>,
    ) -> Reconciliation<I> {
        let candidates: BTreeSet<I> = arrived
            .iter()
            .cloned()
            .chain(self.markers.keys().cloned())
            .collect();

        let mut outcome = Reconciliation::default();
        for id in candidates {
            if sequence.contains(&id) {
                continue;
            }
            if let Some(reversal) = tracker.reverse_last_deletion_for(&id, sequence) {
                debug!(axis = %I::AXIS, %id, "vetoed concurrent deletion");
                outcome.vetoed.push(id);
                outcome.reversals.push(reversal);
            }
        }

        outcome.cleared = self.markers.clear().len();
        outcome
    }
}

/// What a reconciliation pass did.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation<I> {
    /// Identities whose deletion was reversed.
    pub vetoed: Vec<I>,
    pub reversals: Vec<Reversal<I>>,
    /// Number of markers cleared.
    pub cleared: usize,
}

impl<I> Default for Reconciliation<I> {
    fn default() -> Self {
        Self {
            vetoed: Vec::new(),
            reversals: Vec::new(),
            cleared: 0,
        }
    }
}

impl<I> Reconciliation<I> {
    /// Whether the pass restored anything.
    pub fn restored_any(&self) -> bool {
        !self.vetoed.is_empty()
    }
}

/// Touch sets of both axes.
#[derive(Clone, Debug, PartialEq)]
pub struct KeepArbiter {
    pub rows: TouchSet<RowId>,
    pub cols: TouchSet<ColId>,
}

impl KeepArbiter {
    pub fn new(replica_id: impl Into<String>) -> Self {
        let replica_id = replica_id.into();
        Self {
            rows: TouchSet::new(replica_id.clone()),
            cols: TouchSet::new(replica_id),
        }
    }

    /// A cell write touches both its row and its column.
    pub fn touch_cell(&mut self, row: &RowId, col: &ColId) {
        self.rows.touch(row);
        self.cols.touch(col);
    }

    /// A label write touches its column.
    pub fn touch_label(&mut self, col: &ColId) {
        self.cols.touch(col);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::StructuralOp;

    fn rows(n: usize) -> (IdSequence<RowId>, Vec<RowId>) {
        let mut seq = IdSequence::new("r1");
        let ids: Vec<RowId> = (0..n).map(|_| RowId::new()).collect();
        for id in &ids {
            seq.push_back(id.clone());
        }
        seq.take_delta();
        (seq, ids)
    }

    fn delete(
        seq: &mut IdSequence<RowId>,
        tracker: &mut StructuralTracker<RowId>,
        index: usize,
    ) -> RowId {
        let id = seq.get(index).cloned().unwrap();
        let (element, _) = seq.remove(index).unwrap();
        tracker.record(vec![StructuralOp::Removed {
            element,
            id: id.clone(),
            index,
        }]);
        id
    }

    #[test]
    fn test_touch_and_forget() {
        let mut set: TouchSet<RowId> = TouchSet::new("r1");
        let id = RowId::new();

        set.touch(&id);
        assert!(set.is_touched(&id));
        assert_eq!(set.toucher(&id), Some("r1"));

        assert!(set.forget(&id).is_some());
        assert!(!set.is_touched(&id));
        assert!(set.forget(&id).is_none());
    }

    #[test]
    fn test_markers_replicate() {
        let mut a: TouchSet<ColId> = TouchSet::new("a");
        let mut b: TouchSet<ColId> = TouchSet::new("b");
        let id = ColId::new();

        a.touch(&id);
        for op in a.take_delta() {
            assert!(b.apply(&op));
        }
        assert_eq!(b.toucher(&id), Some("a"));
    }

    #[test]
    fn test_outranked_marker_still_arrives() {
        let mut a: TouchSet<RowId> = TouchSet::new("a");
        let mut b: TouchSet<RowId> = TouchSet::new("b");
        let id = RowId::new();

        // First round: b sees a's marker and clears it
        a.touch(&id);
        for op in a.take_delta() {
            assert!(b.apply(&op));
        }
        let (mut seq, _) = rows(1);
        let mut tracker: StructuralTracker<RowId> = StructuralTracker::new("b");
        b.reconcile(&[], &mut seq, &mut tracker);
        b.take_delta();

        // a touches again without having seen the clear; the clear outranks it
        let op = a.touch(&id);
        assert!(b.apply(&op));
        assert!(!b.is_touched(&id));

        // Redelivery is not new
        assert!(!b.apply(&op));
    }

    #[test]
    fn test_cleared_marker_is_not_an_arrival() {
        let mut a: TouchSet<ColId> = TouchSet::new("a");
        let mut b: TouchSet<ColId> = TouchSet::new("b");
        let id = ColId::new();

        b.touch(&id);
        for op in b.take_delta() {
            a.apply(&op);
        }
        a.forget(&id);
        for op in a.take_delta() {
            assert!(!b.apply(&op));
        }
        assert!(b.is_empty());
    }

    #[test]
    fn test_reconcile_vetoes_missing_identity() {
        let (mut seq, ids) = rows(3);
        let mut tracker = StructuralTracker::new("r1");
        let mut set = TouchSet::new("r1");

        let deleted = delete(&mut seq, &mut tracker, 1);
        let outcome = set.reconcile(&[deleted.clone()], &mut seq, &mut tracker);

        assert_eq!(outcome.vetoed, vec![deleted]);
        assert_eq!(seq.to_vec(), ids);
    }

    #[test]
    fn test_reconcile_ignores_present_identity() {
        let (mut seq, ids) = rows(2);
        let mut tracker: StructuralTracker<RowId> = StructuralTracker::new("r1");
        let mut set = TouchSet::new("r1");
        set.touch(&ids[0]);

        let outcome = set.reconcile(&[], &mut seq, &mut tracker);
        assert!(!outcome.restored_any());
        assert_eq!(outcome.cleared, 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_reconcile_without_history_is_noop() {
        let (mut seq, _) = rows(2);
        let mut tracker: StructuralTracker<RowId> = StructuralTracker::new("r1");
        let mut set = TouchSet::new("r1");

        // Another replica deleted this row, so there is nothing to reverse here
        let (element, _) = seq.remove(0).unwrap();
        let gone = seq.value_of(&element).cloned().unwrap();

        let outcome = set.reconcile(&[gone], &mut seq, &mut tracker);
        assert!(!outcome.restored_any());
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_reconcile_clears_live_markers() {
        let (mut seq, ids) = rows(2);
        let mut tracker = StructuralTracker::new("r1");
        let mut set = TouchSet::new("r1");

        set.touch(&ids[0]);
        set.take_delta();
        let deleted = delete(&mut seq, &mut tracker, 0);
        assert_eq!(deleted, ids[0]);

        // A live marker is a candidate even when it is not in the batch
        let outcome = set.reconcile(&[], &mut seq, &mut tracker);
        assert_eq!(outcome.vetoed, vec![ids[0].clone()]);
        assert!(set.is_empty());
        assert_eq!(set.take_delta().len(), 1);
    }

    #[test]
    fn test_arbiter_touches_both_axes() {
        let mut arbiter = KeepArbiter::new("r1");
        let (row, col) = (RowId::new(), ColId::new());

        arbiter.touch_cell(&row, &col);
        assert!(arbiter.rows.is_touched(&row));
        assert!(arbiter.cols.is_touched(&col));

        let other = ColId::new();
        arbiter.touch_label(&other);
        assert!(arbiter.cols.is_touched(&other));
        assert_eq!(arbiter.rows.len(), 1);
    }
}
