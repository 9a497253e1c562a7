//! Local Cache Layer
//!
//! Byte-budgeted storage for one group's values.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    GuardedCache                          │
//! │           (parking_lot::Mutex, lazy init)                │
//! ├──────────────────────────────────────────────────────────┤
//! │                      LruStore                            │
//! │  ┌───────────────────┐   ┌────────────────────────────┐  │
//! │  │ HashMap<key, slot>│──▶│ slot arena + recency list  │  │
//! │  └───────────────────┘   │ MRU ◀──────────────▶ LRU   │  │
//! │                          └────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry cost is `len(key) + len(value)`; the store evicts from the LRU end
//! until the total is within budget.

mod byteview;
mod guarded;
mod lru;
mod metrics;
mod proptest;

pub use byteview::ByteView;
pub use guarded::GuardedCache;
pub use lru::{entry_cost, AddOutcome, EvictionCallback, LruStore};
pub use metrics::{CacheMetrics, MetricsSnapshot};
