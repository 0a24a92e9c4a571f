//! Consistent-hash ring with weighted virtual nodes.
//!
//! Positions on the ring are MurmurHash3-32 values; each backend owns
//! `max(1, V * weight / 100)` of them, keyed `"{id}#{replica}"`. A flow
//! maps to the first position at or after its tuple hash, wrapping at
//! the top of the u32 space. Membership changes therefore move only the
//! arcs adjacent to the changed backend's virtual nodes.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use flowgate_wire::hash::{hash_key, hash_tuple};
use flowgate_wire::FiveTuple;

/// Default virtual-node base per 100 weight.
pub const DEFAULT_VIRTUAL_NODES: u32 = 150;

/// Sorted map from ring position to backend id, behind one short mutex.
///
/// Lookups take the lock for a single `BTreeMap` range scan; writers
/// (add/remove) are control-plane rare.
pub struct ConsistentHashRing {
    virtual_nodes: u32,
    ring: Mutex<BTreeMap<u32, u32>>,
}

impl ConsistentHashRing {
    /// Create a ring with the given virtual-node base.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of replicas a backend of `weight` owns.
    #[inline]
    fn replicas(&self, weight: u32) -> u32 {
        (self.virtual_nodes * weight / 100).max(1)
    }

    /// Insert a backend's virtual nodes.
    ///
    /// Position collisions are last-write-wins; with a 32-bit space and
    /// a few thousand entries they are vanishingly rare.
    pub fn add(&self, id: u32, weight: u32) {
        let replicas = self.replicas(weight);
        let mut ring = self.ring.lock();
        for i in 0..replicas {
            let pos = hash_key(&format!("{id}#{i}"));
            ring.insert(pos, id);
        }
    }

    /// Erase every virtual node owned by `id`.
    pub fn remove(&self, id: u32) {
        self.ring.lock().retain(|_, v| *v != id);
    }

    /// Map a flow to a backend id. `None` iff the ring is empty.
    pub fn lookup(&self, tuple: &FiveTuple) -> Option<u32> {
        let h = hash_tuple(tuple);
        let ring = self.ring.lock();
        ring.range(h..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, id)| *id)
    }

    /// Total virtual-node count.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// True when no backend owns any position.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tuple(i: u32) -> FiveTuple {
        FiveTuple::new(i, i.wrapping_mul(2), (i % 65535) as u16, 80, 6)
    }

    #[test]
    fn empty_ring_has_no_mapping() {
        let ring = ConsistentHashRing::default();
        assert!(ring.is_empty());
        assert_eq!(ring.lookup(&FiveTuple::default()), None);
    }

    #[test]
    fn single_backend_takes_everything() {
        let ring = ConsistentHashRing::default();
        ring.add(1, 100);
        for i in 0..1000 {
            assert_eq!(ring.lookup(&tuple(i)), Some(1));
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let ring = ConsistentHashRing::default();
        ring.add(1, 100);
        ring.add(2, 100);
        ring.add(3, 100);

        let t = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        let first = ring.lookup(&t).unwrap();
        for _ in 0..100 {
            assert_eq!(ring.lookup(&t), Some(first));
        }
    }

    #[test]
    fn removing_another_backend_keeps_mapping() {
        let ring = ConsistentHashRing::default();
        ring.add(1, 100);
        ring.add(2, 100);
        ring.add(3, 100);

        let t = FiveTuple::new(0x0102_0304, 0x0506_0708, 80, 8080, 6);
        let chosen = ring.lookup(&t).unwrap();
        let victim = (1..=3).find(|id| *id != chosen).unwrap();
        ring.remove(victim);
        assert_eq!(ring.lookup(&t), Some(chosen));
    }

    #[test]
    fn remove_moves_only_the_removed_backends_flows() {
        let ring = ConsistentHashRing::default();
        for id in 1..=4 {
            ring.add(id, 100);
        }

        let before: Vec<_> = (0..5000).map(|i| ring.lookup(&tuple(i)).unwrap()).collect();
        ring.remove(4);
        for (i, prev) in before.iter().enumerate() {
            if *prev != 4 {
                assert_eq!(ring.lookup(&tuple(i as u32)), Some(*prev));
            } else {
                assert_ne!(ring.lookup(&tuple(i as u32)), Some(4));
            }
        }
    }

    #[test]
    fn equal_weights_spread_evenly() {
        let ring = ConsistentHashRing::new(150);
        ring.add(1, 100);
        ring.add(2, 100);
        ring.add(3, 100);

        let total = 10_000;
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for i in 0..total {
            *counts.entry(ring.lookup(&tuple(i)).unwrap()).or_default() += 1;
        }

        let expected = total / 3;
        for id in 1..=3 {
            let got = counts[&id];
            let lo = expected * 7 / 10;
            let hi = expected * 13 / 10;
            assert!(
                (lo..=hi).contains(&got),
                "backend {id} got {got}, expected within [{lo}, {hi}]"
            );
        }
    }

    #[test]
    fn weight_scales_share() {
        let ring = ConsistentHashRing::new(150);
        ring.add(1, 100);
        ring.add(2, 200);

        let total = 10_000u32;
        let mut heavy = 0u32;
        for i in 0..total {
            if ring.lookup(&tuple(i)) == Some(2) {
                heavy += 1;
            }
        }
        // Backend 2 holds 2/3 of the weight; allow +-30% of its share.
        let expected = total * 2 / 3;
        assert!(
            (expected * 7 / 10..=expected * 13 / 10).contains(&heavy),
            "heavy backend got {heavy} of {total}"
        );
    }

    #[test]
    fn weight_below_one_replica_still_lands() {
        let ring = ConsistentHashRing::new(150);
        ring.add(1, 0);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn clear_empties_the_ring() {
        let ring = ConsistentHashRing::default();
        ring.add(1, 100);
        assert!(!ring.is_empty());
        ring.clear();
        assert_eq!(ring.lookup(&tuple(7)), None);
    }
}
