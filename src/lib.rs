//! FatCache - Distributed Read-Through Cache
//!
//! An embeddable cache that serves values from a byte-bounded local store
//! and, on a miss, loads each key exactly once even under concurrent demand:
//! either from the peer that owns the key or from a local data source.
//!
//! # Architecture
//!
//! ```text
//! GroupRegistry ──▶ Group ──▶ GuardedCache ──▶ LruStore
//!      ▲              │
//!      │              ├──▶ FlightGroup (per-key call coalescing)
//!      │              │
//!      │              └──▶ PeerPicker ──▶ HashRing
//!      │                        │
//!      └──── HttpPool ◀─────────┘ (serves peers, fetches via HttpGetter)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fatcache::{GetterFn, GroupRegistry, HttpPool};
//!
//! # async fn run() -> fatcache::Result<()> {
//! let registry = Arc::new(GroupRegistry::new());
//! let group = registry.new_group(
//!     "scores",
//!     2 << 10,
//!     GetterFn::new(|key: &str| {
//!         let key = key.to_string();
//!         async move { Ok(format!("Value for {}", key).into_bytes()) }
//!     }),
//! );
//!
//! let pool = Arc::new(HttpPool::new("127.0.0.1:8001", Arc::clone(&registry))?);
//! pool.set_peers(&["127.0.0.1:8001", "127.0.0.1:8002"]);
//! group.register_peers(pool.clone());
//!
//! let value = group.get("Tom").await?;
//! println!("{}", value);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - LRU store, guarded cache, value snapshots and counters
//! - [`error`] - Error types
//! - [`flight`] - Per-key call coalescing
//! - [`group`] - Groups and local data sources
//! - [`metrics`] - Prometheus exposition
//! - [`peer`] - HTTP peer transport
//! - [`registry`] - Group registry
//! - [`ring`] - Consistent hash ring

pub mod cache;
pub mod error;
pub mod flight;
pub mod group;
pub mod metrics;
pub mod peer;
pub mod registry;
pub mod ring;

// Re-export commonly used types
pub use cache::{ByteView, CacheMetrics, GuardedCache, LruStore, MetricsSnapshot};
pub use error::{Error, Result};
pub use flight::FlightGroup;
pub use group::{Getter, GetterFn, Group, GroupConfig, GroupStats};
pub use metrics::MetricsExporter;
pub use peer::{HttpGetter, HttpPool, PeerGetter, PeerPicker, PoolConfig};
pub use registry::GroupRegistry;
pub use ring::HashRing;
