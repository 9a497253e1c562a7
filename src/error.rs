//! Error types for FatCache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in FatCache
///
/// Every variant is cloneable: a single coalesced load hands the same result
/// to every caller that joined it, so sources that are not `Clone` (reqwest,
/// I/O) are captured as their display text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Group Errors
    // =========================================================================
    /// No group registered under this name
    #[error("no such group: {0}")]
    NoSuchGroup(String),

    /// The local data source failed to produce a value
    #[error("failed to load data for key {key}: {reason}")]
    LoadFailed { key: String, reason: String },

    /// Key plus value exceed the group's byte budget
    #[error("value for key {key} is too large to cache: {size} bytes exceeds budget of {budget}")]
    ValueTooLarge { key: String, size: i64, budget: i64 },

    // =========================================================================
    // Peer Transport Errors
    // =========================================================================
    /// The peer could not be reached or the response body could not be read
    #[error("peer {peer} unreachable: {reason}")]
    PeerConnection { peer: String, reason: String },

    /// The peer answered with a non-success status
    #[error("peer {peer} returned status {status}")]
    PeerStatus { peer: String, status: u16 },

    /// Malformed peer protocol request
    #[error("bad request: {0}")]
    BadRequest(String),

    // =========================================================================
    // General
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures talking to a remote peer; the group recovers from
    /// these by loading locally.
    pub fn is_peer_error(&self) -> bool {
        matches!(self, Error::PeerConnection { .. } | Error::PeerStatus { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_message_keeps_reason() {
        let err = Error::LoadFailed {
            key: "k".to_string(),
            reason: "key not existing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load data for key k: key not existing"
        );
    }

    #[test]
    fn test_value_too_large_message() {
        let err = Error::ValueTooLarge {
            key: "largeKey".to_string(),
            size: 2056,
            budget: 1024,
        };
        assert!(err.to_string().contains("too large to cache"));
        assert!(err.to_string().contains("largeKey"));
    }

    #[test]
    fn test_peer_error_classification() {
        assert!(Error::PeerStatus {
            peer: "a".to_string(),
            status: 500
        }
        .is_peer_error());
        assert!(Error::PeerConnection {
            peer: "a".to_string(),
            reason: "refused".to_string()
        }
        .is_peer_error());
        assert!(!Error::NoSuchGroup("g".to_string()).is_peer_error());
    }
}
