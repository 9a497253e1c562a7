//! Peer pool: routing table plus the HTTP server half of the protocol

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::client::{normalize_peer, HttpGetter};
use super::{PeerGetter, PeerPicker, DEFAULT_BASE_PATH};
use crate::error::{Error, Result};
use crate::registry::GroupRegistry;
use crate::ring::{HashRing, DEFAULT_REPLICAS};

/// Peer transport configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// URL prefix for peer requests, with leading and trailing `/`
    pub base_path: String,
    /// Virtual nodes per peer on the hash ring
    pub replicas: usize,
    /// Timeout for a single peer fetch
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            replicas: DEFAULT_REPLICAS,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Current peer set. Replaced wholesale by [`HttpPool::set_peers`].
struct PeerSet {
    ring: HashRing,
    peers: Vec<String>,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// HTTP peer pool for one node
///
/// Picks the owning peer for a key and serves this node's groups to the
/// other peers.
pub struct HttpPool {
    /// This node's own address, normalised
    self_addr: String,
    config: PoolConfig,
    registry: Arc<GroupRegistry>,
    client: Client,
    peers: RwLock<PeerSet>,
}

impl HttpPool {
    /// Create a pool with default configuration
    pub fn new(self_addr: &str, registry: Arc<GroupRegistry>) -> Result<Self> {
        Self::with_config(self_addr, registry, PoolConfig::default())
    }

    /// Create a pool with explicit configuration
    pub fn with_config(
        self_addr: &str,
        registry: Arc<GroupRegistry>,
        config: PoolConfig,
    ) -> Result<Self> {
        if !config.base_path.starts_with('/') || !config.base_path.ends_with('/') {
            return Err(Error::Config(format!(
                "base path must start and end with '/': {}",
                config.base_path
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let peers = PeerSet {
            ring: HashRing::new(config.replicas),
            peers: Vec::new(),
            getters: HashMap::new(),
        };

        Ok(Self {
            self_addr: normalize_peer(self_addr),
            config,
            registry,
            client,
            peers: RwLock::new(peers),
        })
    }

    /// Replace the peer set. The list should include this node.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let ring = HashRing::new(self.config.replicas);
        ring.add(peers);

        let names: Vec<String> = peers.iter().map(|p| p.as_ref().to_string()).collect();
        let getters = names
            .iter()
            .map(|peer| {
                let getter = HttpGetter::new(peer, &self.config.base_path, self.client.clone());
                (peer.clone(), Arc::new(getter))
            })
            .collect();

        info!(self_addr = %self.self_addr, peers = ?names, "Peer set updated");

        *self.peers.write() = PeerSet {
            ring,
            peers: names,
            getters,
        };
    }

    /// Registered peers, in the order given to `set_peers`
    pub fn peers(&self) -> Vec<String> {
        self.peers.read().peers.clone()
    }

    /// This node's normalised address
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn base_path(&self) -> &str {
        &self.config.base_path
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Serve one peer request for `path` (the raw, still percent-encoded
    /// request path).
    pub async fn handle(&self, path: &str) -> Response<Full<Bytes>> {
        let Some(rest) = path.strip_prefix(self.config.base_path.as_str()) else {
            warn!(path = %path, "Request outside the peer base path");
            return text_response(StatusCode::BAD_REQUEST, format!("unexpected path: {}", path));
        };

        let (group_name, key) = match parse_segments(rest) {
            Ok(parts) => parts,
            Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
        };

        let Some(group) = self.registry.get_group(&group_name) else {
            return text_response(
                StatusCode::NOT_FOUND,
                Error::NoSuchGroup(group_name).to_string(),
            );
        };
        group.metrics().record_server_request();
        debug!(group = %group_name, key = %key, "Serving peer request");

        match group.get(&key).await {
            Ok(view) => {
                let mut response = Response::new(Full::new(view.to_bytes()));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    /// Accept connections on `listener` until it fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote) = listener
                .accept()
                .await
                .map_err(|e| Error::Internal(format!("Peer server accept error: {}", e)))?;

            let io = TokioIo::new(stream);
            let pool = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let path = req.uri().path().to_string();
                        Ok::<_, std::convert::Infallible>(pool.handle(&path).await)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(remote = %remote, "Peer server connection error: {}", e);
                }
            });
        }
    }

    /// Bind `addr` and serve the peer protocol on it
    pub async fn bind_and_serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid peer server address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind peer server: {}", e)))?;

        info!("Peer server listening on {}", addr);
        self.serve(listener).await
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.read();
        let owner = peers.ring.get(key)?;
        if normalize_peer(&owner) == self.self_addr {
            return None;
        }

        debug!(key = %key, peer = %owner, "Picked remote peer");
        let getter = peers.getters.get(&owner)?;
        Some(Arc::clone(getter) as Arc<dyn PeerGetter>)
    }
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_addr", &self.self_addr)
            .field("base_path", &self.config.base_path)
            .field("peers", &self.peers.read().peers)
            .finish()
    }
}

/// Split `<group>/<key>` and percent-decode both. The key keeps any
/// further `/`. An empty group is left for the registry lookup to reject.
fn parse_segments(rest: &str) -> Result<(String, String)> {
    let mut parts = rest.splitn(2, '/');
    let (group, key) = match (parts.next(), parts.next()) {
        (Some(group), Some(key)) => (group, key),
        _ => return Err(Error::BadRequest(format!("expected <group>/<key>, got {}", rest))),
    };

    let group = urlencoding::decode(group)
        .map_err(|e| Error::BadRequest(format!("invalid group encoding: {}", e)))?;
    let key = urlencoding::decode(key)
        .map_err(|e| Error::BadRequest(format!("invalid key encoding: {}", e)))?;

    Ok((group.into_owned(), key.into_owned()))
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
