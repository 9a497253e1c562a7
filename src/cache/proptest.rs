//! Property-Based Tests for the LRU store
//!
//! # Test Properties
//!
//! 1. **Budget**: tracked bytes never exceed the budget after any operation
//! 2. **Accounting**: tracked bytes equal the sum of live entry costs
//! 3. **Model agreement**: the store evicts exactly what a naive LRU list would

#![cfg(test)]

use proptest::prelude::*;

use super::byteview::ByteView;
use super::lru::{entry_cost, AddOutcome, LruStore};

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Add(u8, usize),
    Get(u8),
    RemoveOldest,
}

/// Small key space so that updates and hits actually happen.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..16, 0usize..40).prop_map(|(k, len)| Op::Add(k, len)),
        3 => (0u8..16).prop_map(Op::Get),
        1 => Just(Op::RemoveOldest),
    ]
}

fn key(k: u8) -> String {
    format!("key{}", k)
}

/// Reference LRU: front is most recently used.
struct Model {
    max_bytes: i64,
    entries: Vec<(String, ByteView)>,
}

impl Model {
    fn bytes(&self) -> i64 {
        self.entries.iter().map(|(k, v)| entry_cost(k, v)).sum()
    }

    fn get(&mut self, key: &str) -> Option<ByteView> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos);
        let value = entry.1.clone();
        self.entries.insert(0, entry);
        Some(value)
    }

    fn add(&mut self, key: &str, value: ByteView) {
        if entry_cost(key, &value) > self.max_bytes {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == key) {
            self.entries.remove(pos);
        }
        self.entries.insert(0, (key.to_string(), value));
        while self.bytes() > self.max_bytes {
            self.entries.pop();
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the budget holds after every operation and accounting is exact.
    #[test]
    fn prop_budget_invariant(
        max_bytes in 1i64..128,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let mut store = LruStore::new(max_bytes, None)?;

        for op in ops {
            match op {
                Op::Add(k, len) => {
                    let value = ByteView::from(vec![b'x'; len]);
                    let oversize = entry_cost(&key(k), &value) > max_bytes;
                    let outcome = store.add(&key(k), value);
                    if oversize {
                        prop_assert_eq!(outcome, AddOutcome::Rejected);
                    }
                }
                Op::Get(k) => {
                    store.get(&key(k));
                }
                Op::RemoveOldest => {
                    store.remove_oldest();
                }
            }

            prop_assert!(store.size_bytes() <= max_bytes);
            let live: i64 = store
                .keys()
                .iter()
                .map(|k| entry_cost(k, store.peek(k).unwrap()))
                .sum();
            prop_assert_eq!(live, store.size_bytes());
            prop_assert_eq!(store.keys().len(), store.len());
        }
    }

    /// Property: recency order and eviction victims match a naive LRU list.
    #[test]
    fn prop_matches_reference_lru(
        max_bytes in 8i64..96,
        ops in prop::collection::vec(op_strategy(), 1..150),
    ) {
        let mut store = LruStore::new(max_bytes, None)?;
        let mut model = Model { max_bytes, entries: Vec::new() };

        for op in ops {
            match op {
                Op::Add(k, len) => {
                    let value = ByteView::from(vec![k; len]);
                    store.add(&key(k), value.clone());
                    model.add(&key(k), value);
                }
                Op::Get(k) => {
                    prop_assert_eq!(store.get(&key(k)), model.get(&key(k)));
                }
                Op::RemoveOldest => {
                    let expected = model.entries.pop().map(|(k, _)| k);
                    prop_assert_eq!(store.remove_oldest().map(|(k, _)| k), expected);
                }
            }

            let expected: Vec<String> = model.entries.iter().map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(store.keys(), expected);
        }
    }
}
