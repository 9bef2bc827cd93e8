//! Property-based tests for the replicated containers
//!
//! These tests verify the properties the grid layer relies on:
//!  - Lattice laws of the state join, and join agreeing with op delivery
//!  - Op delivery order does not affect the converged state
//!  - Re-delivering ops is harmless

use gridkeep_core::{IdSequence, Lattice, LwwMap, MapOp, SeqOp};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum SeqAction {
    Insert(usize, u8),
    Remove(usize),
    Restore(usize),
}

fn seq_action() -> impl Strategy<Value = SeqAction> {
    prop_oneof![
        (0usize..8, any::<u8>()).prop_map(|(i, v)| SeqAction::Insert(i, v)),
        (0usize..8).prop_map(SeqAction::Remove),
        (0usize..8).prop_map(SeqAction::Restore),
    ]
}

/// Replay a script on a fresh replica and return the ops it produced.
fn run_script(replica: &str, actions: &[SeqAction]) -> (IdSequence<u8>, Vec<SeqOp<u8>>) {
    let mut seq = IdSequence::new(replica);
    let mut removed = Vec::new();
    for action in actions {
        match action {
            SeqAction::Insert(i, v) => {
                seq.insert(*i, *v);
            }
            SeqAction::Remove(i) => {
                if seq.is_empty() {
                    continue;
                }
                if let Some((id, _)) = seq.remove(*i % seq.len()) {
                    removed.push(id);
                }
            }
            SeqAction::Restore(i) => {
                if removed.is_empty() {
                    continue;
                }
                let id = removed[*i % removed.len()].clone();
                seq.restore(&id);
            }
        }
    }
    let ops = seq.take_delta();
    (seq, ops)
}

fn lww_strategy(replica: &'static str) -> impl Strategy<Value = LwwMap<u8, u8>> {
    prop::collection::vec((0u8..6, prop::option::of(any::<u8>())), 0..12).prop_map(
        move |writes| {
            let mut map = LwwMap::new(replica);
            for (k, v) in writes {
                match v {
                    Some(v) => {
                        map.set(k, v);
                    }
                    None => {
                        map.delete(&k);
                    }
                }
            }
            map.take_delta();
            map
        },
    )
}

// ============================================================================
// LwwMap
// ============================================================================

proptest! {
    #[test]
    fn lww_join_is_commutative(a in lww_strategy("r1"), b in lww_strategy("r2")) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn lww_join_is_associative(
        a in lww_strategy("r1"),
        b in lww_strategy("r2"),
        c in lww_strategy("r3"),
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn lww_join_is_idempotent(a in lww_strategy("r1")) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn lww_apply_order_is_irrelevant(
        writes in prop::collection::vec((0u8..4, any::<u8>(), 0usize..3), 1..20),
        seed in any::<u64>(),
    ) {
        let mut replicas: Vec<LwwMap<u8, u8>> =
            vec![LwwMap::new("r1"), LwwMap::new("r2"), LwwMap::new("r3")];
        let mut ops: Vec<MapOp<u8, u8>> = Vec::new();
        for (k, v, r) in writes {
            ops.push(replicas[r].set(k, v));
        }

        let mut forward = LwwMap::new("x");
        for op in &ops {
            forward.apply(op);
        }

        let mut shuffled = ops.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = (seed as usize).wrapping_mul(i + 7) % len;
            shuffled.swap(i, j);
        }
        let mut other = LwwMap::new("y");
        for op in shuffled.iter().chain(ops.iter()) {
            other.apply(op);
        }

        prop_assert_eq!(forward, other);
    }

    #[test]
    fn lww_join_matches_op_delivery(
        a in prop::collection::vec((0u8..4, prop::option::of(any::<u8>())), 0..10),
        b in prop::collection::vec((0u8..4, prop::option::of(any::<u8>())), 0..10),
    ) {
        let script = |replica: &str, writes: &[(u8, Option<u8>)]| {
            let mut map: LwwMap<u8, u8> = LwwMap::new(replica);
            for &(k, v) in writes {
                match v {
                    Some(v) => {
                        map.set(k, v);
                    }
                    None => {
                        map.delete(&k);
                    }
                }
            }
            let ops = map.take_delta();
            (map, ops)
        };
        let (r1, _) = script("r1", &a[..]);
        let (r2, ops2) = script("r2", &b[..]);

        let mut via_ops = r1.clone();
        for op in &ops2 {
            via_ops.apply(op);
        }

        prop_assert_eq!(r1.join(&r2), via_ops);
    }
}

// ============================================================================
// IdSequence
// ============================================================================

proptest! {
    #[test]
    fn sequence_ops_converge_in_any_order(
        a in prop::collection::vec(seq_action(), 0..12),
        b in prop::collection::vec(seq_action(), 0..12),
    ) {
        let (mut r1, ops1) = run_script("r1", &a[..]);
        let (mut r2, ops2) = run_script("r2", &b[..]);

        for op in ops2.iter().rev() {
            r1.apply(op);
        }
        for op in &ops1 {
            r2.apply(op);
        }

        prop_assert_eq!(r1.deferred_count(), 0);
        prop_assert_eq!(r2.deferred_count(), 0);
        prop_assert_eq!(r1.to_vec(), r2.to_vec());
        prop_assert_eq!(&r1, &r2);
    }

    #[test]
    fn sequence_redelivery_is_harmless(a in prop::collection::vec(seq_action(), 0..12)) {
        let (origin, ops) = run_script("r1", &a[..]);

        let mut once = IdSequence::new("r2");
        let mut twice = IdSequence::new("r3");
        for op in &ops {
            once.apply(op);
            twice.apply(op);
            twice.apply(op);
        }

        prop_assert_eq!(once.to_vec(), origin.to_vec());
        prop_assert_eq!(&once, &twice);
    }

    #[test]
    fn sequence_join_matches_op_delivery(
        a in prop::collection::vec(seq_action(), 0..10),
        b in prop::collection::vec(seq_action(), 0..10),
    ) {
        let (r1, _) = run_script("r1", &a[..]);
        let (r2, ops2) = run_script("r2", &b[..]);
        let joined = r1.join(&r2);

        let mut via_ops = r1.clone();
        for op in &ops2 {
            via_ops.apply(op);
        }

        prop_assert_eq!(joined.to_vec(), via_ops.to_vec());
        prop_assert_eq!(joined.join(&r2), joined.clone());
    }
}
