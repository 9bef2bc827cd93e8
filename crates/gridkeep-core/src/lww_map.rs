//! LWW Map - an associative map CRDT with last-writer-wins registers per key.
//!
//! Every key holds a value (or a tombstone) tagged with the [`Stamp`] of the
//! write that produced it. The write with the highest stamp wins; concurrent
//! writes are therefore broken by Lamport time and then by replica id.
//! Deletion is a write of a tombstone, so a delete and a concurrent write
//! resolve with the same rule.

use crate::lattice::{Lattice, OpCrdt};
use crate::stamp::{LamportClock, Stamp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A single replicated write (a put when `value` is `Some`, a delete otherwise).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOp<K, V> {
    pub key: K,
    pub value: Option<V>,
    pub stamp: Stamp,
}

impl<K, V> MapOp<K, V> {
    pub fn is_put(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Entry<V> {
    value: Option<V>,
    stamp: Stamp,
}

/// Map CRDT keyed by `K` with last-writer-wins values of type `V`.
#[derive(Clone, Debug)]
pub struct LwwMap<K: Ord + Clone, V: Clone> {
    /// Live values and tombstones
    entries: BTreeMap<K, Entry<V>>,
    /// Clock used to stamp local writes
    clock: LamportClock,
    /// Local ops not yet handed out for replication
    pending: Vec<MapOp<K, V>>,
}

// Entries are written as a list of pairs so that non-string keys survive JSON.
impl<K: Ord + Clone + Serialize, V: Clone + Serialize> Serialize for LwwMap<K, V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct SerializableLwwMap<'a, K: Serialize, V: Serialize> {
            entries: Vec<(&'a K, &'a Entry<V>)>,
            clock: &'a LamportClock,
        }

        SerializableLwwMap {
            entries: self.entries.iter().collect(),
            clock: &self.clock,
        }
        .serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for LwwMap<K, V>
where
    K: Ord + Clone + Deserialize<'de>,
    V: Clone + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct DeserializableLwwMap<K, V> {
            entries: Vec<(K, Entry<V>)>,
            clock: LamportClock,
        }

        let raw = DeserializableLwwMap::<K, V>::deserialize(deserializer)?;
        Ok(Self {
            entries: raw.entries.into_iter().collect(),
            clock: raw.clock,
            pending: Vec::new(),
        })
    }
}

impl<K: Ord + Clone, V: Clone> LwwMap<K, V> {
    /// Create an empty map owned by `replica_id`.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            entries: BTreeMap::new(),
            clock: LamportClock::new(replica_id),
            pending: Vec::new(),
        }
    }

    pub fn replica_id(&self) -> &str {
        self.clock.replica()
    }

    /// Write a value at `key`.
    pub fn set(&mut self, key: K, value: V) -> MapOp<K, V> {
        self.write(key, Some(value))
    }

    /// Delete `key`. Returns `None` when there is no live value to delete.
    pub fn delete(&mut self, key: &K) -> Option<MapOp<K, V>> {
        if !self.has(key) {
            return None;
        }
        Some(self.write(key.clone(), None))
    }

    /// Delete every live key.
    pub fn clear(&mut self) -> Vec<MapOp<K, V>> {
        let live: Vec<K> = self.keys().cloned().collect();
        live.into_iter().map(|key| self.write(key, None)).collect()
    }

    fn write(&mut self, key: K, value: Option<V>) -> MapOp<K, V> {
        let stamp = self.clock.tick();
        self.entries.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                stamp: stamp.clone(),
            },
        );
        let op = MapOp { key, value, stamp };
        self.pending.push(op.clone());
        op
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).and_then(|e| e.value.as_ref())
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Stamp of the last write at `key`, tombstones included.
    pub fn stamp_of(&self, key: &K) -> Option<&Stamp> {
        self.entries.get(key).map(|e| &e.stamp)
    }

    /// Iterate live keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterate live `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value.as_ref().map(|v| (k, v)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the pending ops.
    pub fn take_delta(&mut self) -> Vec<MapOp<K, V>> {
        std::mem::take(&mut self.pending)
    }

    /// Integrate an op from any replica.
    ///
    /// Returns `true` when the op took effect, i.e. it carried a newer stamp
    /// than the current entry for its key.
    pub fn apply(&mut self, op: &MapOp<K, V>) -> bool {
        self.clock.observe(&op.stamp);
        if let Some(existing) = self.entries.get(&op.key) {
            if existing.stamp >= op.stamp {
                return false;
            }
        }
        self.entries.insert(
            op.key.clone(),
            Entry {
                value: op.value.clone(),
                stamp: op.stamp.clone(),
            },
        );
        true
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> PartialEq for LwwMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Lattice for LwwMap<K, V> {
    fn bottom() -> Self {
        Self::new("")
    }

    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.pending.clear();
        for (key, entry) in &other.entries {
            let newer = result
                .entries
                .get(key)
                .map(|e| e.stamp < entry.stamp)
                .unwrap_or(true);
            if newer {
                result.entries.insert(key.clone(), entry.clone());
            }
        }
        let latest = self.clock.time().max(other.clock.time());
        result.clock.observe(&Stamp::new(latest, ""));
        result
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> OpCrdt for LwwMap<K, V> {
    type Op = MapOp<K, V>;

    fn take_delta(&mut self) -> Vec<Self::Op> {
        LwwMap::take_delta(self)
    }

    fn apply(&mut self, op: &Self::Op) -> bool {
        LwwMap::apply(self, op)
    }
}

impl<K: Ord + Clone, V: Clone> Default for LwwMap<K, V> {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_basic_operations() {
        let mut map: LwwMap<String, String> = LwwMap::new("r1");

        map.set("key1".to_string(), "a".to_string());
        assert_eq!(map.get(&"key1".to_string()), Some(&"a".to_string()));

        map.set("key1".to_string(), "b".to_string());
        assert_eq!(map.get(&"key1".to_string()), Some(&"b".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_map_delete_only_live_keys() {
        let mut map: LwwMap<String, i32> = LwwMap::new("r1");

        assert!(map.delete(&"missing".to_string()).is_none());

        map.set("k".to_string(), 1);
        assert!(map.delete(&"k".to_string()).is_some());
        assert!(!map.has(&"k".to_string()));
        assert!(map.delete(&"k".to_string()).is_none());
    }

    #[test]
    fn test_map_clear() {
        let mut map: LwwMap<String, i32> = LwwMap::new("r1");
        map.set("a".to_string(), 1);
        map.set("b".to_string(), 2);
        map.take_delta();

        let ops = map.clear();
        assert_eq!(ops.len(), 2);
        assert!(map.is_empty());
        assert!(map.clear().is_empty());
    }

    #[test]
    fn test_concurrent_writes_tie_break_on_replica() {
        let mut m1: LwwMap<String, String> = LwwMap::new("r1");
        let mut m2: LwwMap<String, String> = LwwMap::new("r2");

        m1.set("k".to_string(), "from-r1".to_string());
        m2.set("k".to_string(), "from-r2".to_string());

        let d1 = m1.take_delta();
        let d2 = m2.take_delta();
        for op in &d2 {
            m1.apply(op);
        }
        for op in &d1 {
            m2.apply(op);
        }

        // Same Lamport time, so the higher replica id wins everywhere
        assert_eq!(m1.get(&"k".to_string()), Some(&"from-r2".to_string()));
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut m1: LwwMap<String, i32> = LwwMap::new("r1");
        let mut m2: LwwMap<String, i32> = LwwMap::new("r2");

        let op = m1.set("k".to_string(), 7);
        assert!(m2.apply(&op));
        assert!(!m2.apply(&op));
        assert_eq!(m2.get(&"k".to_string()), Some(&7));
    }

    #[test]
    fn test_observed_delete_beats_earlier_put() {
        let mut m1: LwwMap<String, i32> = LwwMap::new("r1");
        let mut m2: LwwMap<String, i32> = LwwMap::new("r2");

        let put = m1.set("k".to_string(), 1);
        m2.apply(&put);
        let del = m2.delete(&"k".to_string()).unwrap();

        // Delivered out of order on a third replica: the delete still wins
        let mut m3: LwwMap<String, i32> = LwwMap::new("r3");
        assert!(m3.apply(&del));
        assert!(!m3.apply(&put));
        assert!(!m3.has(&"k".to_string()));
    }

    #[test]
    fn test_local_write_after_remote_is_newer() {
        let mut m1: LwwMap<String, i32> = LwwMap::new("r1");
        let mut m2: LwwMap<String, i32> = LwwMap::new("r2");

        for _ in 0..5 {
            m1.set("k".to_string(), 1);
        }
        for op in m1.take_delta() {
            m2.apply(&op);
        }
        let op = m2.set("k".to_string(), 2);
        assert!(op.stamp > *m1.stamp_of(&"k".to_string()).unwrap());
    }

    #[test]
    fn test_map_join_commutative() {
        let mut m1: LwwMap<String, i32> = LwwMap::new("r1");
        m1.set("a".to_string(), 1);
        let mut m2: LwwMap<String, i32> = LwwMap::new("r2");
        m2.set("b".to_string(), 2);
        m2.set("a".to_string(), 3);

        assert_eq!(m1.join(&m2), m2.join(&m1));
        assert_eq!(m1.join(&m2).get(&"a".to_string()), Some(&3));
    }

    #[test]
    fn test_map_serialization() {
        let mut map: LwwMap<(String, String), String> = LwwMap::new("r1");
        map.set(("row".to_string(), "col".to_string()), "v".to_string());

        let serialized = serde_json::to_string(&map).unwrap();
        let deserialized: LwwMap<(String, String), String> =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, map);
    }
}
