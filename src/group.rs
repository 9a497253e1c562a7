//! Cache groups
//!
//! A [`Group`] is a named cache namespace: a byte-bounded local store, a
//! local data source for misses, and optional routing to peers that own
//! some of the keys.
//!
//! # Read path
//!
//! ```text
//! get(key)
//!   ├─ hit in local store ──────────────────────────────▶ value
//!   └─ miss ─▶ FlightGroup (one load per key at a time)
//!                ├─ remote owner? ─▶ PeerGetter::get ──┐
//!                │                     failed ─┐       │
//!                └─ local owner ─▶ Getter::get ◀┘       │
//!                                      │               │
//!                       size check ◀───┴───────────────┘
//!                           └─ populate ─────────────▶ value
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use crate::cache::{entry_cost, ByteView, CacheMetrics, GuardedCache, MetricsSnapshot};
use crate::error::{Error, Result};
use crate::flight::FlightGroup;
use crate::peer::PeerPicker;

/// Local data source consulted on a miss this node is responsible for
#[async_trait]
pub trait Getter: Send + Sync {
    /// Produce the value for `key`
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts an async closure into a [`Getter`]
pub struct GetterFn<F> {
    f: F,
}

impl<F, Fut> GetterFn<F>
where
    F: Fn(&str) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Getter for GetterFn<F>
where
    F: Fn(&str) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.f)(key).await
    }
}

/// Group settings
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub name: String,
    /// Byte budget of the local store; zero or negative disables caching
    pub cache_bytes: i64,
    /// Upper bound on a single local load; `None` waits indefinitely
    pub load_timeout: Option<Duration>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, cache_bytes: i64) -> Self {
        Self {
            name: name.into(),
            cache_bytes,
            load_timeout: None,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }
}

/// Point-in-time view of a group, for diagnostics endpoints
#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    pub name: String,
    pub cache_bytes: i64,
    pub entries: usize,
    pub bytes_used: i64,
    pub in_flight: usize,
    pub metrics: MetricsSnapshot,
}

/// A named cache namespace
pub struct Group {
    name: String,
    cache_bytes: i64,
    load_timeout: Option<Duration>,
    main_cache: GuardedCache,
    getter: Arc<dyn Getter>,
    peers: RwLock<Option<Arc<dyn PeerPicker>>>,
    loader: FlightGroup<ByteView>,
    metrics: Arc<CacheMetrics>,
}

impl Group {
    /// Create a standalone group. Most callers go through
    /// [`GroupRegistry`](crate::registry::GroupRegistry) instead.
    pub fn new(config: GroupConfig, getter: Arc<dyn Getter>) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        Self {
            main_cache: GuardedCache::new(config.cache_bytes, Arc::clone(&metrics)),
            name: config.name,
            cache_bytes: config.cache_bytes,
            load_timeout: config.load_timeout,
            getter,
            peers: RwLock::new(None),
            loader: FlightGroup::new(),
            metrics,
        }
    }

    /// Attach peer routing. Calling again replaces the previous picker.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        let mut guard = self.peers.write();
        if guard.is_some() {
            warn!(group = %self.name, "Replacing previously registered peer picker");
        }
        *guard = Some(peers);
    }

    /// Get the value for `key`, loading it on a miss
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        self.metrics.record_get();

        if let Some(value) = self.main_cache.get(key) {
            self.metrics.record_hit();
            debug!("Cache hit");
            return Ok(value);
        }
        self.metrics.record_miss();
        debug!("Cache miss");

        let value = self.load(key).await?;

        let size = entry_cost(key, &value);
        if size > self.cache_bytes {
            self.metrics.record_oversize_rejection();
            warn!(size, budget = self.cache_bytes, "Value too large to cache");
            return Err(Error::ValueTooLarge {
                key: key.to_string(),
                size,
                budget: self.cache_bytes,
            });
        }

        self.main_cache.add(key, value.clone());
        Ok(value)
    }

    /// Coalesced load: remote owner first, local data source otherwise
    async fn load(&self, key: &str) -> Result<ByteView> {
        let picker = self.peers.read().clone();
        let task = LoadTask {
            group: self.name.clone(),
            key: key.to_string(),
            getter: Arc::clone(&self.getter),
            picker,
            load_timeout: self.load_timeout,
            metrics: Arc::clone(&self.metrics),
        };

        self.loader.run(key, move || task.run()).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_bytes(&self) -> i64 {
        self.cache_bytes
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The group's local store
    pub fn cache(&self) -> &GuardedCache {
        &self.main_cache
    }

    pub fn stats(&self) -> GroupStats {
        GroupStats {
            name: self.name.clone(),
            cache_bytes: self.cache_bytes,
            entries: self.main_cache.len(),
            bytes_used: self.main_cache.bytes(),
            in_flight: self.loader.in_flight(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cache_bytes", &self.cache_bytes)
            .field("has_peers", &self.peers.read().is_some())
            .finish()
    }
}

/// Everything one load needs, owned so it can outlive the caller that
/// started it.
struct LoadTask {
    group: String,
    key: String,
    getter: Arc<dyn Getter>,
    picker: Option<Arc<dyn PeerPicker>>,
    load_timeout: Option<Duration>,
    metrics: Arc<CacheMetrics>,
}

impl LoadTask {
    async fn run(self) -> Result<ByteView> {
        if let Some(peer) = self.picker.as_ref().and_then(|p| p.pick_peer(&self.key)) {
            match peer.get(&self.group, &self.key).await {
                Ok(bytes) => {
                    self.metrics.record_peer_load();
                    debug!(peer = %peer.addr(), key = %self.key, "Loaded from peer");
                    return Ok(ByteView::new(bytes));
                }
                Err(e) if e.is_peer_error() => {
                    self.metrics.record_peer_error();
                    warn!(
                        peer = %peer.addr(),
                        key = %self.key,
                        "Peer fetch failed, loading locally: {}",
                        e
                    );
                }
                Err(e) => {
                    self.metrics.record_peer_error();
                    error!(
                        peer = %peer.addr(),
                        key = %self.key,
                        "Peer getter failed unexpectedly, loading locally: {}",
                        e
                    );
                }
            }
        }

        self.get_locally().await
    }

    async fn get_locally(&self) -> Result<ByteView> {
        let load = self.getter.get(&self.key);
        let result = match self.load_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, load).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
            },
            None => load.await,
        };

        match result {
            Ok(data) => {
                self.metrics.record_local_load();
                Ok(ByteView::new(data))
            }
            Err(e) => {
                self.metrics.record_local_error();
                Err(Error::LoadFailed {
                    key: self.key.clone(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerGetter;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Data source that answers "Value for <key>" and counts its calls
    fn counting_getter(calls: Arc<AtomicUsize>) -> Arc<dyn Getter> {
        Arc::new(GetterFn::new(move |key: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = format!("Value for {}", key);
            async move { Ok(value.into_bytes()) }
        }))
    }

    fn group(cache_bytes: i64, getter: Arc<dyn Getter>) -> Group {
        Group::new(GroupConfig::new("test", cache_bytes), getter)
    }

    struct StaticPeer {
        addr: String,
        response: Result<Bytes>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for StaticPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }

        fn addr(&self) -> &str {
            &self.addr
        }
    }

    /// Routes every key to one peer
    struct AlwaysPick(Arc<StaticPeer>);

    impl PeerPicker for AlwaysPick {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(Arc::clone(&self.0) as Arc<dyn PeerGetter>)
        }
    }

    struct NeverPick;

    impl PeerPicker for NeverPick {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            None
        }
    }

    #[test]
    fn test_getter_fn() {
        let getter = GetterFn::new(|key: &str| {
            let key = key.to_string();
            async move { Ok(key.into_bytes()) }
        });
        let value = tokio_test::block_on(getter.get("key")).unwrap();
        assert_eq!(value, b"key".to_vec());
    }

    #[tokio::test]
    async fn test_get_loads_then_serves_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(1024, counting_getter(Arc::clone(&calls)));

        let first = group.get("myKey").await.unwrap();
        assert_eq!(first.to_string(), "Value for myKey");

        let second = group.get("myKey").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = group.stats();
        assert_eq!(stats.metrics.hits, 1);
        assert_eq!(stats.metrics.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_small_budget_evicts_older_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(20, counting_getter(Arc::clone(&calls)));

        group.get("key1").await.unwrap();
        group.get("key2").await.unwrap();

        assert!(group.cache().peek("key1").is_none());
        assert!(group.cache().peek("key2").is_some());

        group.get("key1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_gets_load_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let getter = {
            let calls = Arc::clone(&calls);
            Arc::new(GetterFn::new(move |key: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
                let value = format!("Value for {}", key);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(value.into_bytes())
                }
            }))
        };
        let group = Arc::new(group(1024, getter));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let group = Arc::clone(&group);
                tokio::spawn(async move { group.get("hot").await })
            })
            .collect();

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value.to_string(), "Value for hot");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversize_value_is_not_cached() {
        let group = group(
            1024,
            Arc::new(GetterFn::new(|_key: &str| async {
                Ok(vec![b'x'; 2048])
            })),
        );

        let result = group.get("largeKey").await;
        assert_matches!(
            result,
            Err(Error::ValueTooLarge { size: 2056, budget: 1024, .. })
        );
        assert!(group.cache().is_empty());
    }

    #[tokio::test]
    async fn test_load_error_propagates_and_caches_nothing() {
        let db: HashMap<&str, &str> = [("Tom", "630")].into_iter().collect();
        let group = group(
            1024,
            Arc::new(GetterFn::new(move |key: &str| {
                let found = db.get(key).map(|v| v.as_bytes().to_vec());
                let key = key.to_string();
                async move { found.ok_or_else(|| anyhow::anyhow!("{} not exist", key)) }
            })),
        );

        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");

        let err = group.get("unknown").await.unwrap_err();
        assert_matches!(&err, Error::LoadFailed { key, .. } if key == "unknown");
        assert!(err.to_string().contains("unknown not exist"));
        assert!(group.cache().peek("unknown").is_none());
        assert_eq!(group.stats().metrics.local_errors, 1);
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let group = Group::new(
            GroupConfig::new("slow", 1024).with_load_timeout(Duration::from_millis(20)),
            Arc::new(GetterFn::new(|_key: &str| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(b"late".to_vec())
            })),
        );

        let err = group.get("k").await.unwrap_err();
        assert_matches!(&err, Error::LoadFailed { reason, .. } if reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_peer_value_is_used_and_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(1024, counting_getter(Arc::clone(&calls)));
        let peer = Arc::new(StaticPeer {
            addr: "peer-a".to_string(),
            response: Ok(Bytes::from_static(b"from peer")),
            calls: AtomicUsize::new(0),
        });
        group.register_peers(Arc::new(AlwaysPick(Arc::clone(&peer))));

        assert_eq!(group.get("k").await.unwrap().to_string(), "from peer");
        assert_eq!(group.get("k").await.unwrap().to_string(), "from peer");

        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(group.stats().metrics.peer_loads, 1);
    }

    #[tokio::test]
    async fn test_peer_failure_falls_back_to_local() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(1024, counting_getter(Arc::clone(&calls)));
        let peer = Arc::new(StaticPeer {
            addr: "peer-b".to_string(),
            response: Err(Error::PeerStatus {
                peer: "peer-b".to_string(),
                status: 500,
            }),
            calls: AtomicUsize::new(0),
        });
        group.register_peers(Arc::new(AlwaysPick(Arc::clone(&peer))));

        assert_eq!(group.get("k").await.unwrap().to_string(), "Value for k");
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = group.stats().metrics;
        assert_eq!(metrics.peer_errors, 1);
        assert_eq!(metrics.local_loads, 1);
    }

    #[tokio::test]
    async fn test_non_transport_peer_error_also_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(1024, counting_getter(Arc::clone(&calls)));
        let peer = Arc::new(StaticPeer {
            addr: "peer-c".to_string(),
            response: Err(Error::Internal("codec broke".to_string())),
            calls: AtomicUsize::new(0),
        });
        group.register_peers(Arc::new(AlwaysPick(Arc::clone(&peer))));

        assert_eq!(group.get("k").await.unwrap().to_string(), "Value for k");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().metrics.peer_errors, 1);
    }

    #[tokio::test]
    async fn test_self_owned_key_loads_locally() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(1024, counting_getter(Arc::clone(&calls)));
        group.register_peers(Arc::new(NeverPick));

        group.get("k").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().metrics.peer_loads, 0);
    }

    #[tokio::test]
    async fn test_zero_budget_reports_too_large() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = group(0, counting_getter(Arc::clone(&calls)));

        assert_matches!(group.get("k").await, Err(Error::ValueTooLarge { .. }));
        assert!(!group.cache().is_initialized());
    }
}
