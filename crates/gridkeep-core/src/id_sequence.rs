//! Identity sequence - a Replicated Growable Array of opaque values.
//!
//! The sequence supports positional insert and delete like any list, but
//! every element also carries a stable element id (a [`Stamp`]) and keeps its
//! slot as a tombstone after deletion. That gives two properties the grid
//! layer depends on:
//! - Concurrent inserts and deletes from any number of replicas converge.
//! - A deleted element can be brought back *in place* with [`IdSequence::restore`],
//!   even after other replicas shifted the surrounding indices.
//!
//! An element is visible while every removal recorded against it has been
//! cancelled by a restore. A restore only cancels the removals its replica had
//! observed, so a removal concurrent with the restore still wins.

use crate::lattice::{Lattice, OpCrdt};
use crate::stamp::{LamportClock, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A node in the sequence, visible or tombstoned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeqNode<T> {
    /// Element id, unique across replicas.
    pub id: Stamp,
    /// The element this one was inserted after.
    pub origin: Stamp,
    /// The stored value, kept for tombstones too.
    pub value: T,
    /// Stamps of every removal applied to this element.
    pub removals: BTreeSet<Stamp>,
    /// Removal stamps cancelled by restores.
    pub restored: BTreeSet<Stamp>,
}

impl<T> SeqNode<T> {
    fn new(id: Stamp, origin: Stamp, value: T) -> Self {
        Self {
            id,
            origin,
            value,
            removals: BTreeSet::new(),
            restored: BTreeSet::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.removals.is_subset(&self.restored)
    }
}

/// Replicated operation on an [`IdSequence`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SeqOp<T> {
    /// A new element placed after `origin`.
    Insert { id: Stamp, origin: Stamp, value: T },
    /// Tombstone `target`.
    Remove { target: Stamp, stamp: Stamp },
    /// Cancel the listed removals of `target`.
    Restore {
        target: Stamp,
        cancels: Vec<Stamp>,
        stamp: Stamp,
    },
}

impl<T> SeqOp<T> {
    /// The stamp this op was issued with.
    pub fn stamp(&self) -> &Stamp {
        match self {
            SeqOp::Insert { id, .. } => id,
            SeqOp::Remove { stamp, .. } | SeqOp::Restore { stamp, .. } => stamp,
        }
    }

    /// The element that must be integrated before this op can apply.
    pub fn dependency(&self) -> &Stamp {
        match self {
            SeqOp::Insert { origin, .. } => origin,
            SeqOp::Remove { target, .. } | SeqOp::Restore { target, .. } => target,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, SeqOp::Insert { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, SeqOp::Remove { .. })
    }
}

/// Ordered sequence CRDT.
#[derive(Clone, Debug)]
pub struct IdSequence<T: Clone + PartialEq> {
    /// All nodes indexed by element id.
    nodes: HashMap<Stamp, SeqNode<T>>,
    /// Children of each node, sorted by descending id.
    children: HashMap<Stamp, Vec<Stamp>>,
    clock: LamportClock,
    /// Local ops not yet handed out for replication.
    pending_delta: Vec<SeqOp<T>>,
    /// Remote ops whose dependency has not arrived yet.
    deferred: Vec<SeqOp<T>>,
}

impl<T: Clone + PartialEq> IdSequence<T> {
    /// Create an empty sequence owned by `replica_id`.
    pub fn new(replica_id: impl Into<String>) -> Self {
        let mut children = HashMap::new();
        children.insert(Stamp::genesis(), Vec::new());
        Self {
            nodes: HashMap::new(),
            children,
            clock: LamportClock::new(replica_id),
            pending_delta: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn replica_id(&self) -> &str {
        self.clock.replica()
    }

    /// Insert a value so that it ends up at visible `index`.
    ///
    /// An index past the end appends.
    pub fn insert(&mut self, index: usize, value: T) -> SeqOp<T> {
        let index = index.min(self.len());
        let origin = if index == 0 {
            Stamp::genesis()
        } else {
            self.element_at(index - 1).unwrap_or_else(Stamp::genesis)
        };
        self.insert_after(&origin, value)
    }

    /// Insert a value directly after the element `origin`.
    pub fn insert_after(&mut self, origin: &Stamp, value: T) -> SeqOp<T> {
        let id = self.clock.tick();
        self.integrate_node(SeqNode::new(id.clone(), origin.clone(), value.clone()));
        let op = SeqOp::Insert {
            id,
            origin: origin.clone(),
            value,
        };
        self.pending_delta.push(op.clone());
        op
    }

    pub fn push_back(&mut self, value: T) -> SeqOp<T> {
        let len = self.len();
        self.insert(len, value)
    }

    /// Remove the element at visible `index`, returning its element id.
    pub fn remove(&mut self, index: usize) -> Option<(Stamp, SeqOp<T>)> {
        let id = self.element_at(index)?;
        let op = self.remove_element(&id)?;
        Some((id, op))
    }

    /// Tombstone a visible element.
    pub fn remove_element(&mut self, id: &Stamp) -> Option<SeqOp<T>> {
        if !self.is_visible(id) {
            return None;
        }
        let stamp = self.clock.tick();
        let node = self.nodes.get_mut(id)?;
        node.removals.insert(stamp.clone());
        let op = SeqOp::Remove {
            target: id.clone(),
            stamp,
        };
        self.pending_delta.push(op.clone());
        Some(op)
    }

    /// Bring a tombstoned element back at its original slot.
    ///
    /// Returns `None` if the element is unknown or already visible.
    pub fn restore(&mut self, id: &Stamp) -> Option<SeqOp<T>> {
        let cancels: Vec<Stamp> = {
            let node = self.nodes.get(id)?;
            if node.is_visible() {
                return None;
            }
            node.removals.difference(&node.restored).cloned().collect()
        };
        let stamp = self.clock.tick();
        let node = self.nodes.get_mut(id)?;
        node.restored.extend(cancels.iter().cloned());
        let op = SeqOp::Restore {
            target: id.clone(),
            cancels,
            stamp,
        };
        self.pending_delta.push(op.clone());
        Some(op)
    }

    /// Get the value at visible `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.iter_visible().nth(index).map(|n| &n.value)
    }

    /// Get the element id at visible `index`.
    pub fn element_at(&self, index: usize) -> Option<Stamp> {
        self.iter_visible().nth(index).map(|n| n.id.clone())
    }

    /// Value stored in an element, visible or not.
    pub fn value_of(&self, id: &Stamp) -> Option<&T> {
        self.nodes.get(id).map(|n| &n.value)
    }

    /// Visible index of the first element holding `value`.
    pub fn position_of(&self, value: &T) -> Option<usize> {
        self.iter_visible().position(|n| &n.value == value)
    }

    /// Visible index of an element.
    pub fn index_of_element(&self, id: &Stamp) -> Option<usize> {
        self.iter_visible().position(|n| &n.id == id)
    }

    /// Ids of all visible elements, in order.
    pub fn elements(&self) -> Vec<Stamp> {
        self.iter_visible().map(|n| n.id.clone()).collect()
    }

    /// Ids of every visible element holding `value`, in order.
    pub fn visible_elements_of(&self, value: &T) -> Vec<Stamp> {
        self.iter_visible()
            .filter(|n| &n.value == value)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.position_of(value).is_some()
    }

    /// Whether the element has been integrated (visible or tombstoned).
    pub fn knows(&self, id: &Stamp) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn is_visible(&self, id: &Stamp) -> bool {
        self.nodes.get(id).map(|n| n.is_visible()).unwrap_or(false)
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| n.is_visible()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned elements.
    pub fn tombstone_count(&self) -> usize {
        self.nodes.len() - self.len()
    }

    /// Number of remote ops still waiting on a dependency.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Iterate visible values in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.iter_visible().map(|n| &n.value)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    fn iter_visible(&self) -> impl Iterator<Item = &SeqNode<T>> {
        self.iter_nodes().filter(|n| n.is_visible())
    }

    /// Iterate all nodes in order (including tombstones).
    fn iter_nodes(&self) -> SeqIterator<'_, T> {
        SeqIterator {
            seq: self,
            stack: vec![Stamp::genesis()],
            visited: HashSet::new(),
        }
    }

    fn integrate_node(&mut self, node: SeqNode<T>) {
        let id = node.id.clone();
        let origin = node.origin.clone();

        self.nodes.insert(id.clone(), node);

        // Newer siblings come first
        let children = self.children.entry(origin).or_default();
        let pos = children
            .iter()
            .position(|c| c < &id)
            .unwrap_or(children.len());
        children.insert(pos, id.clone());

        self.children.entry(id).or_default();
    }

    /// Take the pending delta.
    pub fn take_delta(&mut self) -> Vec<SeqOp<T>> {
        std::mem::take(&mut self.pending_delta)
    }

    /// Integrate an op from any replica.
    ///
    /// Returns `true` if the visible content changed, including changes
    /// unlocked for previously deferred ops.
    pub fn apply(&mut self, op: &SeqOp<T>) -> bool {
        self.clock.observe(op.stamp());
        let mut changed = if self.is_ready(op) {
            self.apply_ready(op)
        } else {
            if !self.deferred.contains(op) {
                self.deferred.push(op.clone());
            }
            false
        };

        while let Some(pos) = self.deferred.iter().position(|d| self.is_ready(d)) {
            let ready = self.deferred.remove(pos);
            changed |= self.apply_ready(&ready);
        }
        changed
    }

    fn is_ready(&self, op: &SeqOp<T>) -> bool {
        let dependency = op.dependency();
        match op {
            SeqOp::Insert { .. } => dependency.is_genesis() || self.nodes.contains_key(dependency),
            _ => self.nodes.contains_key(dependency),
        }
    }

    fn apply_ready(&mut self, op: &SeqOp<T>) -> bool {
        match op {
            SeqOp::Insert { id, origin, value } => {
                if self.nodes.contains_key(id) {
                    return false;
                }
                self.integrate_node(SeqNode::new(id.clone(), origin.clone(), value.clone()));
                true
            }
            SeqOp::Remove { target, stamp } => match self.nodes.get_mut(target) {
                Some(node) => {
                    let before = node.is_visible();
                    node.removals.insert(stamp.clone());
                    before != node.is_visible()
                }
                None => false,
            },
            SeqOp::Restore {
                target, cancels, ..
            } => match self.nodes.get_mut(target) {
                Some(node) => {
                    let before = node.is_visible();
                    node.restored.extend(cancels.iter().cloned());
                    before != node.is_visible()
                }
                None => false,
            },
        }
    }
}

/// Depth-first traversal of the sequence tree.
struct SeqIterator<'a, T: Clone + PartialEq> {
    seq: &'a IdSequence<T>,
    stack: Vec<Stamp>,
    visited: HashSet<Stamp>,
}

impl<'a, T: Clone + PartialEq> Iterator for SeqIterator<'a, T> {
    type Item = &'a SeqNode<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if !self.visited.insert(id.clone()) {
                continue;
            }

            // Push children in reverse order (so first child is processed first)
            if let Some(children) = self.seq.children.get(&id) {
                for child in children.iter().rev() {
                    if !self.visited.contains(child) {
                        self.stack.push(child.clone());
                    }
                }
            }

            if !id.is_genesis() {
                if let Some(node) = self.seq.nodes.get(&id) {
                    return Some(node);
                }
            }
        }
        None
    }
}

impl<T: Clone + PartialEq> PartialEq for IdSequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl<T: Clone + PartialEq> Lattice for IdSequence<T> {
    fn bottom() -> Self {
        Self::new("")
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.pending_delta.clear();

        // An origin always carries a smaller stamp than its children
        let mut incoming: Vec<&SeqNode<T>> = other.nodes.values().collect();
        incoming.sort_by(|a, b| a.id.cmp(&b.id));

        for node in incoming {
            result.clock.observe(&node.id);
            if let Some(existing) = result.nodes.get_mut(&node.id) {
                existing.removals.extend(node.removals.iter().cloned());
                existing.restored.extend(node.restored.iter().cloned());
            } else {
                result.integrate_node(node.clone());
            }
        }

        for op in &other.deferred {
            result.apply(op);
        }
        result
    }
}

impl<T: Clone + PartialEq> OpCrdt for IdSequence<T> {
    type Op = SeqOp<T>;

    fn take_delta(&mut self) -> Vec<Self::Op> {
        IdSequence::take_delta(self)
    }

    fn apply(&mut self, op: &Self::Op) -> bool {
        IdSequence::apply(self, op)
    }
}

impl<T: Clone + PartialEq> Default for IdSequence<T> {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(from: &mut IdSequence<&'static str>, to: &mut IdSequence<&'static str>) {
        for op in from.take_delta() {
            to.apply(&op);
        }
    }

    #[test]
    fn test_basic_operations() {
        let mut seq: IdSequence<String> = IdSequence::new("r1");

        seq.push_back("a".to_string());
        seq.push_back("b".to_string());
        seq.push_back("c".to_string());

        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(0), Some(&"a".to_string()));
        assert_eq!(seq.get(2), Some(&"c".to_string()));
        assert_eq!(seq.position_of(&"b".to_string()), Some(1));
    }

    #[test]
    fn test_insert_at_front_and_middle() {
        let mut seq: IdSequence<i32> = IdSequence::new("r1");

        seq.push_back(2);
        seq.push_back(4);
        seq.insert(0, 1);
        seq.insert(2, 3);

        assert_eq!(seq.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_past_end_appends() {
        let mut seq: IdSequence<i32> = IdSequence::new("r1");
        seq.push_back(1);
        seq.insert(10, 2);
        assert_eq!(seq.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_remove_keeps_tombstone() {
        let mut seq: IdSequence<i32> = IdSequence::new("r1");
        seq.push_back(1);
        seq.push_back(2);
        seq.push_back(3);

        let (id, _) = seq.remove(1).unwrap();
        assert_eq!(seq.to_vec(), vec![1, 3]);
        assert!(seq.knows(&id));
        assert!(!seq.is_visible(&id));
        assert_eq!(seq.tombstone_count(), 1);
        assert!(seq.remove_element(&id).is_none());
    }

    #[test]
    fn test_restore_in_place_after_shift() {
        let mut r1: IdSequence<&str> = IdSequence::new("r1");
        let mut r2: IdSequence<&str> = IdSequence::new("r2");

        r1.push_back("a");
        r1.push_back("b");
        r1.push_back("c");
        sync(&mut r1, &mut r2);

        // r1 deletes "b" while r2 inserts at the front
        let (b, _) = r1.remove(1).unwrap();
        r2.insert(0, "z");
        sync(&mut r1, &mut r2);
        sync(&mut r2, &mut r1);
        assert_eq!(r1.to_vec(), vec!["z", "a", "c"]);

        r1.restore(&b).unwrap();
        sync(&mut r1, &mut r2);

        assert_eq!(r1.to_vec(), vec!["z", "a", "b", "c"]);
        assert_eq!(r1.to_vec(), r2.to_vec());
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut seq: IdSequence<i32> = IdSequence::new("r1");
        seq.push_back(1);
        let (id, _) = seq.remove(0).unwrap();

        assert!(seq.restore(&id).is_some());
        assert!(seq.restore(&id).is_none());
        assert_eq!(seq.to_vec(), vec![1]);
    }

    #[test]
    fn test_unobserved_remove_wins_over_restore() {
        let mut r1: IdSequence<&str> = IdSequence::new("r1");
        let mut r2: IdSequence<&str> = IdSequence::new("r2");
        r1.push_back("a");
        sync(&mut r1, &mut r2);

        let (a, _) = r1.remove(0).unwrap();
        sync(&mut r1, &mut r2);
        r1.restore(&a).unwrap();
        // r2 restores and removes again without seeing r1's restore
        r2.restore(&a).unwrap();
        r2.remove_element(&a).unwrap();

        sync(&mut r1, &mut r2);
        sync(&mut r2, &mut r1);

        assert!(r1.is_empty());
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let mut r1: IdSequence<&str> = IdSequence::new("r1");
        let mut r2: IdSequence<&str> = IdSequence::new("r2");

        r1.push_back("a");
        sync(&mut r1, &mut r2);

        r1.push_back("b");
        r2.push_back("c");

        let d1 = r1.take_delta();
        let d2 = r2.take_delta();
        for op in &d2 {
            r1.apply(op);
        }
        for op in &d1 {
            r2.apply(op);
        }

        assert_eq!(r1.to_vec(), r2.to_vec());
        assert_eq!(r1.len(), 3);
    }

    #[test]
    fn test_out_of_order_delivery_is_deferred() {
        let mut r1: IdSequence<i32> = IdSequence::new("r1");
        r1.push_back(1);
        r1.push_back(2);
        r1.remove(0);
        let ops = r1.take_delta();

        let mut r2: IdSequence<i32> = IdSequence::new("r2");
        for op in ops.iter().rev() {
            r2.apply(op);
        }

        assert_eq!(r2.deferred_count(), 0);
        assert_eq!(r2.to_vec(), vec![2]);
    }

    #[test]
    fn test_lattice_join() {
        let mut r1: IdSequence<i32> = IdSequence::new("r1");
        let mut r2: IdSequence<i32> = IdSequence::new("r2");

        r1.push_back(1);
        r2.push_back(2);

        let merged = r1.join(&r2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged, r2.join(&r1));
    }
}
