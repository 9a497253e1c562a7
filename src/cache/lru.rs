//! Byte-budgeted LRU store
//!
//! Single-threaded core of the cache; [`GuardedCache`](super::GuardedCache)
//! wraps it in a lock.
//!
//! # Design
//!
//! - Entries live in a slot arena (`Vec<Option<Node>>` plus a free list)
//! - Recency is a doubly linked list threaded through the arena by index,
//!   most-recently-used at the head
//! - `HashMap<String, usize>` indexes keys to their slot
//!
//! Every operation is O(1). The cost of an entry is `len(key) + len(value)`;
//! after each mutation the total cost is at most `max_bytes`.

use std::collections::HashMap;

use tracing::{trace, warn};

use super::byteview::ByteView;
use crate::error::{Error, Result};

/// Notification hook invoked with each evicted entry.
///
/// Runs synchronously while the owning cache's lock is held, so it must not
/// call back into that cache or block.
pub type EvictionCallback = Box<dyn FnMut(&str, &ByteView) + Send>;

/// What [`LruStore::add`] did with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New key inserted at the most-recently-used position
    Inserted,
    /// Existing key's value replaced and promoted
    Updated,
    /// Entry larger than the whole budget; nothing changed
    Rejected,
}

struct Node {
    key: String,
    value: ByteView,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn cost(&self) -> i64 {
        entry_cost(&self.key, &self.value)
    }
}

/// Byte cost of an entry as tracked against the budget
#[inline]
pub fn entry_cost(key: &str, value: &ByteView) -> i64 {
    key.len() as i64 + value.len() as i64
}

/// Least-recently-used map bounded by total key + value bytes
pub struct LruStore {
    /// Budget in bytes
    max_bytes: i64,
    /// Bytes currently tracked
    nbytes: i64,
    /// Slot arena
    slots: Vec<Option<Node>>,
    /// Vacant slot indices
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    /// Key -> slot
    index: HashMap<String, usize>,
    on_evict: Option<EvictionCallback>,
}

impl LruStore {
    /// Create a store with the given byte budget.
    ///
    /// A budget of zero or less cannot hold anything and is rejected.
    pub fn new(max_bytes: i64, on_evict: Option<EvictionCallback>) -> Result<Self> {
        if max_bytes <= 0 {
            return Err(Error::Config(format!(
                "LRU byte budget must be positive, got {}",
                max_bytes
            )));
        }

        Ok(Self {
            max_bytes,
            nbytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
            on_evict,
        })
    }

    /// Look up a key, promoting it to most-recently-used on a hit
    pub fn get(&mut self, key: &str) -> Option<ByteView> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_ref().map(|node| node.value.clone())
    }

    /// Look up a key without touching recency
    pub fn peek(&self, key: &str) -> Option<&ByteView> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|node| &node.value)
    }

    /// Check if a key is present (does not touch recency)
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace an entry, then evict until within budget
    pub fn add(&mut self, key: &str, value: ByteView) -> AddOutcome {
        let cost = entry_cost(key, &value);
        if cost > self.max_bytes {
            warn!(
                key = %key,
                cost,
                max_bytes = self.max_bytes,
                "Value too large to cache, skipping"
            );
            return AddOutcome::Rejected;
        }

        let outcome = match self.index.get(key).copied() {
            Some(idx) => {
                if let Some(node) = self.slots[idx].as_mut() {
                    self.nbytes += value.len() as i64 - node.value.len() as i64;
                    node.value = value;
                }
                self.move_to_front(idx);
                AddOutcome::Updated
            }
            None => {
                let idx = self.alloc(Node {
                    key: key.to_string(),
                    value,
                    prev: None,
                    next: None,
                });
                self.push_front(idx);
                self.index.insert(key.to_string(), idx);
                self.nbytes += cost;
                AddOutcome::Inserted
            }
        };

        while self.nbytes > self.max_bytes && self.remove_oldest().is_some() {}

        outcome
    }

    /// Evict the least-recently-used entry, if any
    pub fn remove_oldest(&mut self) -> Option<(String, ByteView)> {
        let idx = self.tail?;
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        self.index.remove(&node.key);
        self.nbytes -= node.cost();

        trace!(key = %node.key, nbytes = self.nbytes, "Evicted oldest entry");
        if let Some(on_evict) = self.on_evict.as_mut() {
            on_evict(&node.key, &node.value);
        }

        Some((node.key, node.value))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently tracked
    pub fn size_bytes(&self) -> i64 {
        self.nbytes
    }

    /// Configured budget
    pub fn max_bytes(&self) -> i64 {
        self.max_bytes
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.slots[idx].as_ref() {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    // =========================================================================
    // Recency list
    // =========================================================================

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.slots[h].as_mut() {
                    node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("max_bytes", &self.max_bytes)
            .field("nbytes", &self.nbytes)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
