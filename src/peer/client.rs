//! HTTP client half of the peer protocol

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, instrument};

use super::PeerGetter;
use crate::error::{Error, Result};

/// Turn a peer address into a base URL.
///
/// Accepts `host:port` or a full `http(s)://` URL; trailing slashes are dropped.
pub fn normalize_peer(peer: &str) -> String {
    let peer = peer.trim().trim_end_matches('/');
    if peer.starts_with("http://") || peer.starts_with("https://") {
        peer.to_string()
    } else {
        format!("http://{}", peer)
    }
}

/// Fetches values from one peer over HTTP
#[derive(Debug, Clone)]
pub struct HttpGetter {
    /// Peer address as registered
    peer: String,
    /// `<scheme>://<host:port><base_path>`
    base_url: String,
    client: Client,
}

impl HttpGetter {
    /// Create a getter for `peer`, sharing `client`'s connection pool
    pub fn new(peer: &str, base_path: &str, client: Client) -> Self {
        Self {
            peer: peer.to_string(),
            base_url: format!("{}{}", normalize_peer(peer), base_path),
            client,
        }
    }

    /// Request URL for a group and key
    pub fn url(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    #[instrument(skip(self), fields(peer = %self.peer))]
    async fn get(&self, group: &str, key: &str) -> Result<Bytes> {
        let url = self.url(group, key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::PeerConnection {
                peer: self.peer.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PeerStatus {
                peer: self.peer.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::PeerConnection {
            peer: self.peer.clone(),
            reason: format!("failed to read response body: {}", e),
        })?;

        debug!(url = %url, size = body.len(), "Fetched value from peer");
        Ok(body)
    }

    fn addr(&self) -> &str {
        &self.peer
    }
}
