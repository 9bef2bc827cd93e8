//! Join-semilattice trait shared by every replicated container.
//!
//! A join-semilattice (S, ⊔) satisfies:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence:  a ⊔ a = a
//!
//! Replicas in this workspace exchange operations, never whole states. The
//! state join is the reference merge: delivering every op to both sides must
//! land on the same state as joining them, and the property tests hold each
//! container to that.

use std::cmp::Ordering;

/// State-based merge.
pub trait Lattice: Clone + PartialEq {
    /// The bottom element (identity for join)
    fn bottom() -> Self;

    /// Join operation (least upper bound)
    /// Must be commutative, associative, and idempotent
    fn join(&self, other: &Self) -> Self;

    /// Partial order derived from join:  a ≤ b iff a ⊔ b = b
    fn partial_cmp_lattice(&self, other: &Self) -> Option<Ordering> {
        let joined = self.join(other);
        if &joined == self && &joined == other {
            Some(Ordering::Equal)
        } else if &joined == other {
            Some(Ordering::Less)
        } else if &joined == self {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// Check if self ≤ other in the lattice order
    fn leq(&self, other: &Self) -> bool {
        matches!(
            self.partial_cmp_lattice(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// Join-assign:  self = self ⊔ other
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }
}

/// Containers that replicate by shipping operations.
///
/// Local mutators record their operations in a pending buffer; the owner
/// drains it with [`OpCrdt::take_delta`] and ships the ops to peers, who feed
/// them to [`OpCrdt::apply`]. Applying the same op twice is a no-op.
pub trait OpCrdt: Lattice {
    type Op: Clone;

    /// Drain the operations generated locally since the last call.
    fn take_delta(&mut self) -> Vec<Self::Op>;

    /// Integrate an operation; returns whether the visible state changed.
    fn apply(&mut self, op: &Self::Op) -> bool;
}
