//! Consistent hash ring with virtual nodes
//!
//! Maps keys to peer identities so that every node agrees on which peer owns
//! a key.
//!
//! # Algorithm
//!
//! 1. Each peer is hashed into `replicas` virtual nodes (`"<i>-<peer>"`)
//! 2. Virtual node hashes are kept sorted
//! 3. A key belongs to the first virtual node at or after its hash,
//!    wrapping around to the smallest
//!
//! Adding a peer only remaps keys that land between its virtual nodes and
//! their ring predecessors.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Hash function used for both keys and virtual nodes
pub type HashFn = fn(&[u8]) -> u32;

/// Default number of virtual nodes per peer
pub const DEFAULT_REPLICAS: usize = 50;

#[derive(Debug, Default)]
struct RingState {
    /// Sorted virtual node hashes
    keys: Vec<u32>,
    /// Virtual node hash -> peer
    owners: HashMap<u32, String>,
}

/// Consistent hash ring
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    state: RwLock<RingState>,
}

impl HashRing {
    /// Create an empty ring hashing with CRC-32 (IEEE)
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, crc32fast::hash)
    }

    /// Create an empty ring with a custom hash function
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            replicas: replicas.max(1),
            hash,
            state: RwLock::new(RingState::default()),
        }
    }

    /// Add peers to the ring
    pub fn add<S: AsRef<str>>(&self, peers: &[S]) {
        let mut state = self.state.write();
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let hash = (self.hash)(format!("{}-{}", i, peer).as_bytes());
                state.keys.push(hash);
                state.owners.insert(hash, peer.to_string());
            }
        }
        state.keys.sort_unstable();
        state.keys.dedup();
    }

    /// Peer owning `key`, or `None` if the ring is empty
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let idx = state.keys.partition_point(|&h| h < hash);
        let node = state.keys[idx % state.keys.len()];
        state.owners.get(&node).cloned()
    }

    /// Number of virtual nodes on the ring
    pub fn len(&self) -> usize {
        self.state.read().keys.len()
    }

    /// Check if no peers have been added
    pub fn is_empty(&self) -> bool {
        self.state.read().keys.is_empty()
    }

    /// Virtual nodes per peer
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("virtual_nodes", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Reads the decimal number in the input, so ring positions are predictable.
    fn numeric_hash(data: &[u8]) -> u32 {
        let digits: String = std::str::from_utf8(data)
            .unwrap()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        digits.parse().unwrap()
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
    }

    #[test]
    fn test_hashing() {
        // Peers "6", "4", "2" with 3 replicas give nodes
        // 06 16 26, 04 14 24, 02 12 22 once the dash is ignored.
        let ring = HashRing::with_hasher(3, numeric_hash);
        ring.add(&["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")];
        for (key, peer) in cases {
            assert_eq!(ring.get(key).as_deref(), Some(peer), "key {}", key);
        }

        // Adding "8" claims 08, 18, 28
        ring.add(&["8"]);
        assert_eq!(ring.get("27").as_deref(), Some("8"));
        assert_eq!(ring.get("23").as_deref(), Some("4"));
    }

    #[test]
    fn test_deterministic_for_same_key() {
        let ring = HashRing::new(50);
        ring.add(&["10.0.0.1:8001", "10.0.0.2:8001", "10.0.0.3:8001"]);

        for i in 0..100 {
            let key = format!("key-{}", i);
            let first = ring.get(&key);
            assert!(first.is_some());
            for _ in 0..5 {
                assert_eq!(ring.get(&key), first);
            }
        }
    }

    #[test]
    fn test_same_peers_same_mapping_across_rings() {
        let a = HashRing::new(50);
        let b = HashRing::new(50);
        a.add(&["p1", "p2", "p3"]);
        b.add(&["p3", "p1", "p2"]);

        for i in 0..200 {
            let key = format!("k{}", i);
            assert_eq!(a.get(&key), b.get(&key));
        }
    }

    #[test]
    fn test_adding_peer_moves_keys_only_to_new_peer() {
        let ring = HashRing::new(50);
        ring.add(&["p1", "p2", "p3"]);

        let before: Vec<_> = (0..1000).map(|i| ring.get(&format!("k{}", i))).collect();
        ring.add(&["p4"]);
        let after: Vec<_> = (0..1000).map(|i| ring.get(&format!("k{}", i))).collect();

        let mut moved = 0;
        for (old, new) in before.iter().zip(after.iter()) {
            if old != new {
                moved += 1;
                assert_eq!(new.as_deref(), Some("p4"));
            }
        }
        assert!(moved > 0);
        assert!(moved < 1000);
    }

    #[test]
    fn test_distribution_covers_all_peers() {
        let ring = HashRing::new(50);
        ring.add(&["a", "b", "c"]);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..3000 {
            *counts.entry(ring.get(&format!("key{}", i)).unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_replicas_at_least_one() {
        let ring = HashRing::new(0);
        assert_eq!(ring.replicas(), 1);
        ring.add(&["only"]);
        assert_eq!(ring.get("x").as_deref(), Some("only"));
    }
}
