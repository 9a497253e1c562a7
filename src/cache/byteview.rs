//! Immutable byte snapshot
//!
//! The unit of value stored in and returned by the cache.

use bytes::Bytes;

/// Immutable view over a cached payload.
///
/// Cloning is cheap (reference counted). Callers that want to own or mutate
/// the bytes use [`ByteView::byte_slice`], which always returns a fresh copy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    b: Bytes,
}

impl ByteView {
    /// Create a view that takes ownership of `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { b: data.into() }
    }

    /// Create a view from a private copy of `data`
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            b: Bytes::copy_from_slice(data),
        }
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.b.len()
    }

    /// Check if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Copy the payload out
    pub fn byte_slice(&self) -> Vec<u8> {
        self.b.to_vec()
    }

    /// Shared, read-only handle on the payload (no copy)
    pub fn to_bytes(&self) -> Bytes {
        self.b.clone()
    }
}

impl std::fmt::Display for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.b))
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&'static str> for ByteView {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for ByteView {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}
