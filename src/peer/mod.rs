//! Peer Transport
//!
//! Lets cache nodes serve each other's misses over HTTP.
//!
//! # Architecture
//!
//! ```text
//!   Group::get(key) miss
//!          │
//!          ▼
//!   PeerPicker::pick_peer(key) ──▶ HashRing ──▶ owner == self? ──▶ load locally
//!          │ remote owner
//!          ▼
//!   PeerGetter::get(group, key) ── GET <peer><base>/<group>/<key> ──▶ HttpPool::handle
//! ```
//!
//! Picking a peer and fetching from it are separate capabilities, so a group
//! with no peers, or whose key is owned by this node, simply loads locally.
//!
//! # Wire protocol
//!
//! - `200` raw value bytes (`application/octet-stream`)
//! - `400` path outside the base path, or not `<group>/<key>`
//! - `404` unknown group
//! - `500` the group failed to produce a value

mod client;
mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use client::{normalize_peer, HttpGetter};
pub use pool::{HttpPool, PoolConfig};

/// Default URL prefix of the peer protocol
pub const DEFAULT_BASE_PATH: &str = "/_fatcache/";

/// Fetches a group's value from one specific peer
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Get the value for `key` in `group` from this peer
    async fn get(&self, group: &str, key: &str) -> Result<Bytes>;

    /// Address of the peer, for diagnostics
    fn addr(&self) -> &str;
}

/// Chooses the peer that owns a key
pub trait PeerPicker: Send + Sync {
    /// The owning peer, or `None` when this node owns the key or there are
    /// no peers
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
