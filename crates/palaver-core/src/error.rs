//! Unified error types for the palaver core.
//!
//! Transport-level failures and API-level failures are kept in separate
//! enums so that the runtime can distinguish "the connection is gone" from
//! "the server said no".

use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Api Errors
// =============================================================================

/// Errors surfaced by bot operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No duplex channel is attached, or it was shut down while a call was
    /// outstanding.
    #[error("not connected to the messaging service")]
    NotConnected,

    /// The remote service rejected the call. Carries the full reply payload
    /// so callers can inspect the reason.
    #[error("request rejected by server: {0}")]
    Rejected(Value),

    /// A name or identifier did not resolve against the roster.
    #[error("unknown target: {token}")]
    UnknownTarget {
        /// The token that failed to resolve.
        token: String,
    },

    /// A hook callback failed or vetoed the operation before its side effect.
    #[error("operation aborted by '{hook}' hook: {reason}")]
    HookAborted {
        /// The hook point that aborted.
        hook: String,
        /// The failure reported by the callback.
        reason: String,
    },

    /// Serialization or payload-shape error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for bot operations.
pub type ApiResult<T> = Result<T, ApiError>;
