//! Error types for the MeshGuard protocol
//!
//! This module contains the error taxonomy used throughout the core: codec,
//! handshake sequencing, transport, timeout and storage errors, plus the
//! `MeshError` type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transported code text could not be turned back into a signal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid code format")]
    NotDecompressible,
    #[error("invalid code format: empty input")]
    Empty,
    #[error("could not encode signal: {0}")]
    NotEncodable(String),
}

/// A well-formed signal arrived in a handshake phase that cannot accept it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("peer must scan your offer first")]
    OfferRejected { state: String },
    #[error("scan the initiator code first")]
    AnswerRejected { state: String },
}

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed to peer {peer_id}: {reason}")]
    ConnectionFailed { peer_id: String, reason: String },
    #[error("network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("link to peer {peer_id} is not connected")]
    NotConnected { peer_id: String },
    #[error("send failed: {reason}")]
    SendFailed { reason: String },
    #[error("link closed: {reason}")]
    Closed { reason: String },
    #[error("invalid transport configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

/// No connected transition within the handshake window
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection timeout")]
pub struct TimeoutError {
    pub waited_ms: u64,
}

/// Persistence operation failed; logged, never fatal
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {reason}")]
    Backend { reason: String },
}

/// Attempted an invalid session lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition from {from} on {event}")]
pub struct LifecycleError {
    pub from: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error types for the MeshGuard protocol
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("handshake sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("session error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel communication error between tasks
    #[error("channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MeshError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        MeshError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transport connection failed error
    pub fn connection_failed<P: Into<String>, R: Into<String>>(peer_id: P, reason: R) -> Self {
        MeshError::Transport(TransportError::ConnectionFailed {
            peer_id: peer_id.into(),
            reason: reason.into(),
        })
    }

    /// Create a send failure
    pub fn send_failed<R: Into<String>>(reason: R) -> Self {
        MeshError::Transport(TransportError::SendFailed {
            reason: reason.into(),
        })
    }

    /// Create a storage backend error
    pub fn storage<R: Into<String>>(reason: R) -> Self {
        MeshError::Storage(StorageError::Backend {
            reason: reason.into(),
        })
    }

    /// Whether the coordinator loop cannot continue after this error
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            MeshError::Channel { .. } | MeshError::Configuration { .. }
        )
    }

    /// Human-readable reason suitable for `AppEvent::PeerError`
    pub fn user_message(&self) -> String {
        match self {
            MeshError::Codec(CodecError::NotEncodable(_)) => {
                "could not create connection code".to_string()
            }
            MeshError::Codec(_) => "invalid code format".to_string(),
            MeshError::Sequence(e) => e.to_string(),
            MeshError::Timeout(e) => e.to_string(),
            MeshError::Transport(TransportError::ConnectionFailed { reason, .. }) => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MeshError>;
pub type MeshResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let offer = MeshError::from(SequenceError::OfferRejected {
            state: "Finalizing".into(),
        });
        assert_eq!(offer.user_message(), "peer must scan your offer first");

        let answer = MeshError::from(SequenceError::AnswerRejected {
            state: "Generating".into(),
        });
        assert_eq!(answer.user_message(), "scan the initiator code first");

        assert_eq!(
            MeshError::from(CodecError::NotDecompressible).user_message(),
            "invalid code format"
        );
        assert_eq!(
            MeshError::from(CodecError::NotEncodable("key must be a string".into()))
                .user_message(),
            "could not create connection code"
        );
        assert_eq!(
            MeshError::from(TimeoutError { waited_ms: 30_000 }).user_message(),
            "connection timeout"
        );
    }

    #[test]
    fn test_unrecoverable_classification() {
        assert!(MeshError::channel_error("closed").is_unrecoverable());
        assert!(MeshError::config_error("bad").is_unrecoverable());
        assert!(!MeshError::send_failed("full").is_unrecoverable());
        assert!(!MeshError::storage("disk").is_unrecoverable());
    }
}
