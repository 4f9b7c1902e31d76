//! Error types for forwarded and direct requests.
//!
//! # Design Decisions
//! - `FetchError` is what callers see; `BridgeError` is what a bridge call returns
//! - Cancellation is its own kind so callers can tell it apart from network failure
//! - Cleanup failures never become a `FetchError`; they are logged and dropped

use thiserror::Error;

use crate::wire::ResourceId;

/// Failure reported by a remote bridge call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The handle does not refer to a live bridge resource.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// The bridge could not turn the wire record into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, TLS, proxy or redirect failure on the bridge side.
    #[error("network failure: {0}")]
    Network(String),

    /// The event channel was closed by the receiving side.
    #[error("event channel closed")]
    ChannelClosed,

    /// Any other failure reported by the remote peer.
    #[error("{0}")]
    Remote(String),
}

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    RemoteOpen,
    RemoteSend,
    Stream,
    Cancelled,
    Network,
}

/// Errors surfaced to the caller of a fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request could not be constructed (bad URL, method or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote `open` call failed; nothing was allocated.
    #[error("bridge open failed: {0}")]
    RemoteOpen(#[source] BridgeError),

    /// The remote `send` call failed.
    #[error("bridge send failed: {0}")]
    RemoteSend(#[source] BridgeError),

    /// The event channel reported an error or ended early.
    #[error("stream error: {0}")]
    Stream(String),

    /// More out-of-order events arrived than the reorder buffer accepts.
    #[error("reorder buffer exceeded {limit} pending events")]
    ReorderOverflow { limit: usize },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Transport failure before a response arrived, on either path.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            FetchError::RemoteOpen(_) => ErrorKind::RemoteOpen,
            FetchError::RemoteSend(_) => ErrorKind::RemoteSend,
            FetchError::Stream(_) | FetchError::ReorderOverflow { .. } => ErrorKind::Stream,
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::Network(_) => ErrorKind::Network,
        }
    }

    /// True when the caller's cancellation produced this error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(FetchError::Cancelled.kind(), ErrorKind::Cancelled);
        assert!(FetchError::Cancelled.is_cancelled());
        assert_eq!(
            FetchError::ReorderOverflow { limit: 4 }.kind(),
            ErrorKind::Stream
        );
        let open = FetchError::RemoteOpen(BridgeError::Network("refused".into()));
        assert_eq!(open.kind(), ErrorKind::RemoteOpen);
        assert!(!open.is_cancelled());
        assert_eq!(open.to_string(), "bridge open failed: network failure: refused");
    }
}
