//! Error Types
//!
//! - [`StreamError`] is the value seen by session consumers: completion
//!   futures that reject and error listeners receive it.
//! - [`TransportError`] describes why one transport attempt failed. The
//!   negotiator never lets it escape to the caller.
//! - [`CacheError`] and [`FrameError`] stay inside the engine; cache failures
//!   are logged and swallowed, malformed frames are logged and dropped.

use std::time::Duration;

use thiserror::Error;

use crate::chunk::TransportKind;

/// Terminal error of a stream session or synthesizer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The fallback resolver rejected
    #[error("fallback resolver failed: {0}")]
    Resolver(String),

    /// The synthesizer was failed explicitly
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// A live transport failed
    #[error("{transport} failed: {reason}")]
    Transport {
        /// Which transport failed
        transport: TransportKind,
        /// What went wrong
        reason: String,
    },

    /// The remote end reported an error mid-stream
    #[error("remote stream error: {0}")]
    Remote(String),

    /// Every transport strategy was skipped without an attempt
    #[error("no transport strategy could be established")]
    NoTransport,

    /// The session was cancelled
    #[error("stream cancelled")]
    Cancelled,

    /// The session was dropped before reaching a terminal state
    #[error("stream abandoned before completion")]
    Abandoned,
}

/// Why a single transport attempt failed
#[derive(Debug, Error)]
pub enum TransportError {
    /// Required endpoint or platform capability is absent (precondition failure)
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Could not connect
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Handshake or upgrade rejected
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Offer/answer exchange failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The fallback resolver rejected
    #[error(transparent)]
    Resolver(StreamError),

    /// Establishment did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether this is a precondition failure (skip silently, try the next strategy)
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Convert to the consumer-facing error for `transport`
    #[must_use]
    pub fn into_stream_error(self, transport: TransportKind) -> StreamError {
        match self {
            Self::Resolver(err) => err,
            other => StreamError::Transport {
                transport,
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connect(format!("request timed out: {err}"))
        } else {
            Self::Connect(err.to_string())
        }
    }
}

/// Replay store failure
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded
    #[error("cache record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored checksum does not match the record body
    #[error("cache record checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the body read back
        actual: u32,
    },

    /// Record shorter than its header claims
    #[error("cache record truncated: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes the header announced
        expected: usize,
        /// Bytes actually present
        found: usize,
    },

    /// Record exceeds the maximum size
    #[error("cache record too large: {size} bytes (max {max})")]
    TooLarge {
        /// Record size
        size: usize,
        /// Maximum allowed
        max: usize,
    },
}

/// Wire frame decoding failure
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not valid JSON, or fields of the wrong shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame exceeds the maximum size
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Frame size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// `type` field missing or not a string
    #[error("frame has no type discriminator")]
    MissingType,

    /// `type` names no known frame
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(TransportError::Unavailable("no endpoint".into()).is_precondition());
        assert!(!TransportError::Connect("refused".into()).is_precondition());
        assert!(!TransportError::Status {
            status: 503,
            body: String::new()
        }
        .is_precondition());
    }

    #[test]
    fn test_resolver_error_passes_through() {
        let err = TransportError::Resolver(StreamError::Resolver("kernel down".into()));
        assert_eq!(
            err.into_stream_error(TransportKind::LocalFallback),
            StreamError::Resolver("kernel down".into())
        );
    }

    #[test]
    fn test_transport_error_tagged_with_kind() {
        let err = TransportError::Handshake("401".into()).into_stream_error(TransportKind::SocketChannel);
        assert_eq!(
            err.to_string(),
            "socket-channel failed: handshake rejected: 401"
        );
    }
}
