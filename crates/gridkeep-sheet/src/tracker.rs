//! Structural mutation tracker - reversible history of row/column deletions.
//!
//! One tracker exists per axis. Every local structural transaction is
//! classified before it is stored:
//! - insert-only transactions are dropped on the spot, because a legitimate
//!   addition must never be reverted by the keep policy;
//! - transactions containing a removal are kept as reversal candidates.
//!
//! Reversing a transaction generates new, causally later operations on the
//! sequence. Shared history is never rewound. The history itself is local to
//! the replica and is not replicated.

use crate::ids::{Axis, Identity};
use gridkeep_core::{IdSequence, SeqOp, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};
use ulid::Ulid;

/// Unique identifier for a structural transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A primitive structural change applied to an axis sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StructuralOp<I> {
    /// A new element holding `id` was inserted.
    Inserted { element: Stamp, id: I },
    /// The element holding `id` was removed from visible `index`.
    Removed { element: Stamp, id: I, index: usize },
    /// A tombstoned element holding `id` was brought back.
    Restored { element: Stamp, id: I },
}

impl<I> StructuralOp<I> {
    pub fn identity(&self) -> &I {
        match self {
            StructuralOp::Inserted { id, .. }
            | StructuralOp::Removed { id, .. }
            | StructuralOp::Restored { id, .. } => id,
        }
    }

    /// Restores add content back, so they count as insertions.
    pub fn is_insertion(&self) -> bool {
        !self.is_removal()
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, StructuralOp::Removed { .. })
    }
}

/// Classification of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Empty,
    InsertOnly,
    RemoveOnly,
    Mixed,
}

impl TransactionKind {
    /// Whether the keep policy may ever reverse a transaction of this kind.
    pub fn is_reversible(&self) -> bool {
        matches!(self, TransactionKind::RemoveOnly | TransactionKind::Mixed)
    }
}

/// An attributable group of structural changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction<I> {
    pub id: TransactionId,
    /// Replica that issued the transaction.
    pub origin: String,
    /// Position in the issuing replica's local history.
    pub seq: u64,
    pub ops: Vec<StructuralOp<I>>,
}

impl<I: Identity> Transaction<I> {
    pub fn new(origin: impl Into<String>, seq: u64, ops: Vec<StructuralOp<I>>) -> Self {
        Self {
            id: TransactionId::new(),
            origin: origin.into(),
            seq,
            ops,
        }
    }

    pub fn kind(&self) -> TransactionKind {
        let removals = self.ops.iter().filter(|op| op.is_removal()).count();
        match (self.ops.len(), removals) {
            (0, _) => TransactionKind::Empty,
            (_, 0) => TransactionKind::InsertOnly,
            (n, r) if n == r => TransactionKind::RemoveOnly,
            _ => TransactionKind::Mixed,
        }
    }

    /// Whether this transaction removed `id`.
    pub fn removes(&self, id: &I) -> bool {
        self.ops
            .iter()
            .any(|op| op.is_removal() && op.identity() == id)
    }
}

/// Outcome of reversing a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Reversal<I> {
    /// The transaction that was reversed.
    pub reversed: TransactionId,
    /// Sequence ops generated by the reversal, ready for replication.
    pub ops: Vec<SeqOp<I>>,
    /// The structural changes the reversal made.
    pub changes: Vec<StructuralOp<I>>,
    /// Whether an identity had to be appended at the end instead of restored in place.
    pub fell_back: bool,
}

/// Reversible structural history for one axis.
#[derive(Clone, Debug)]
pub struct StructuralTracker<I> {
    axis: Axis,
    replica_id: String,
    /// Local transaction counter.
    clock: u64,
    /// Reversal candidates, oldest first.
    history: VecDeque<Transaction<I>>,
    max_history: usize,
}

impl<I: Identity> StructuralTracker<I> {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            axis: I::AXIS,
            replica_id: replica_id.into(),
            clock: 0,
            history: VecDeque::new(),
            max_history: 1000,
        }
    }

    /// Set the maximum history size.
    pub fn set_max_history(&mut self, max: usize) {
        self.max_history = max;
        self.trim_history();
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Record a local structural transaction.
    ///
    /// Returns its classification; only reversible kinds are stored.
    pub fn record(&mut self, ops: Vec<StructuralOp<I>>) -> TransactionKind {
        self.clock += 1;
        let transaction = Transaction::new(&self.replica_id, self.clock, ops);
        let kind = transaction.kind();

        if kind.is_reversible() {
            self.history.push_back(transaction);
            self.trim_history();
        } else {
            debug!(axis = %self.axis, seq = self.clock, ?kind, "transaction not kept for reversal");
        }
        kind
    }

    /// Reverse the most recent transaction that removed `id`.
    ///
    /// Removed elements are restored in place; inserted elements of a mixed
    /// transaction are removed again. If the sequence no longer knows a
    /// removed element, the identity is appended at the end instead. Returns
    /// `None` when no stored transaction removed `id`, which makes a second
    /// call for the same identity a no-op.
    pub fn reverse_last_deletion_for(
        &mut self,
        id: &I,
        sequence: &mut IdSequence<I>,
    ) -> Option<Reversal<I>> {
        let position = self.history.iter().rposition(|t| t.removes(id))?;
        let transaction = self.history.remove(position)?;

        let mut ops = Vec::new();
        let mut changes = Vec::new();
        let mut fell_back = false;

        for op in transaction.ops.iter().rev() {
            match op {
                StructuralOp::Removed { element, id, .. } => {
                    if sequence.knows(element) {
                        if let Some(restore) = sequence.restore(element) {
                            ops.push(restore);
                            changes.push(StructuralOp::Restored {
                                element: element.clone(),
                                id: id.clone(),
                            });
                        }
                    } else if !sequence.contains(id) {
                        warn!(axis = %self.axis, %id, "original slot unknown, appending at end");
                        let insert = sequence.push_back(id.clone());
                        changes.push(StructuralOp::Inserted {
                            element: insert.stamp().clone(),
                            id: id.clone(),
                        });
                        ops.push(insert);
                        fell_back = true;
                    }
                }
                StructuralOp::Inserted { element, id } | StructuralOp::Restored { element, id } => {
                    let index = sequence.index_of_element(element);
                    if let (Some(index), Some(remove)) = (index, sequence.remove_element(element)) {
                        ops.push(remove);
                        changes.push(StructuralOp::Removed {
                            element: element.clone(),
                            id: id.clone(),
                            index,
                        });
                    }
                }
            }
        }

        debug!(
            axis = %self.axis,
            %id,
            reversed_seq = transaction.seq,
            ops = ops.len(),
            fell_back,
            "reversed deletion"
        );

        Some(Reversal {
            reversed: transaction.id,
            ops,
            changes,
            fell_back,
        })
    }

    /// Whether a stored transaction removed `id`.
    pub fn can_reverse(&self, id: &I) -> bool {
        self.history.iter().any(|t| t.removes(id))
    }

    /// Number of stored reversal candidates.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Iterate stored transactions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Transaction<I>> {
        self.history.iter()
    }

    /// Forget all history.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}
