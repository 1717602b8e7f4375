//! Error types for the tessera client
//!
//! This module defines the single error type returned by every layer of the
//! client. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Errors are `Clone` because a memoized future (the primitive cache and the
//! read caches) hands the same outcome to every caller awaiting it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// | Category | Variants | Propagation |
/// |----------|----------|-------------|
/// | Transport | `Transport`, `Unavailable` | Surfaced to the caller of the failing call |
/// | Session | `SessionExpired`, `Closed`, `NotConnected` | Absorbed by keep-alive, then fail fast |
/// | Capability | `Unsupported` | Fails immediately, no network round trip |
/// | Timeout | `Timeout` | Only raised by blocking facades |
/// | Usage | everything else | Surfaced as-is |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Channel or server availability failure on a single call
    Transport,
    /// Session lost, expired or closed
    Session,
    /// Operation not permitted on this primitive instance
    Capability,
    /// Caller-supplied wait budget exceeded
    Timeout,
    /// Invalid input, configuration or internal failure
    Usage,
}

/// Errors raised by the tessera client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum Error {
    // ==================== Transport ====================
    /// The channel to a partition failed
    #[error("transport error: {reason}")]
    Transport {
        /// Failure description
        reason: String,
    },

    /// The server reported a transient condition; the request may be resent
    #[error("partition unavailable: {reason}")]
    Unavailable {
        /// Failure description
        reason: String,
    },

    // ==================== Session ====================
    /// The server no longer knows the session
    #[error("session {session_id} expired")]
    SessionExpired {
        /// Expired session identifier
        session_id: u64,
    },

    /// The primitive (or its session) has been closed
    #[error("primitive closed: {name}")]
    Closed {
        /// Primitive name
        name: String,
    },

    /// The session has not been opened yet
    #[error("primitive not connected: {name}")]
    NotConnected {
        /// Primitive name
        name: String,
    },

    // ==================== Capability ====================
    /// The operation is not supported by this primitive instance
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Operation description
        operation: String,
    },

    // ==================== Timeout ====================
    /// A blocking call did not complete within its budget
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name
        operation: String,
        /// Budget that was exceeded
        timeout_ms: u64,
    },

    // ==================== Usage ====================
    /// Invalid argument
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Failure description
        reason: String,
    },

    /// Invalid client configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Failure description
        reason: String,
    },

    /// No partition group with this identifier exists
    #[error("partition group not found: {group}")]
    PartitionGroupNotFound {
        /// Group identifier
        group: String,
    },

    /// A partition group has no partitions to route to
    #[error("partition group {group} has no partitions")]
    NoPartitions {
        /// Group identifier
        group: String,
    },

    /// A cached primitive was requested with a different primitive type
    #[error("primitive {name} is a {actual}, not a {expected}")]
    TypeMismatch {
        /// Primitive name
        name: String,
        /// Requested kind
        expected: String,
        /// Kind it was built as
        actual: String,
    },

    /// The client has not been started, or was stopped
    #[error("client is not running")]
    NotRunning,

    /// Value encoding or decoding failed
    #[error("serialization error: {reason}")]
    Serialization {
        /// Failure description
        reason: String,
    },

    /// Internal invariant violated
    #[error("internal error: {reason}")]
    Internal {
        /// Failure description
        reason: String,
    },
}

impl Error {
    /// Build a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Error::Transport {
            reason: reason.into(),
        }
    }

    /// Build an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Error::Unavailable {
            reason: reason.into(),
        }
    }

    /// Build a closed error for the named primitive
    pub fn closed(name: impl Into<String>) -> Self {
        Error::Closed { name: name.into() }
    }

    /// Build an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
        }
    }

    /// Build an invalid-input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Build an invalid-config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Build a serialization error
    pub fn serialization(reason: impl Into<String>) -> Self {
        Error::Serialization {
            reason: reason.into(),
        }
    }

    /// Build an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport { .. } | Error::Unavailable { .. } => ErrorCategory::Transport,
            Error::SessionExpired { .. } | Error::Closed { .. } | Error::NotConnected { .. } => {
                ErrorCategory::Session
            }
            Error::Unsupported { .. } => ErrorCategory::Capability,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            _ => ErrorCategory::Usage,
        }
    }

    /// Whether a command failing with this error may be resent with the same
    /// sequence number.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable { .. })
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
