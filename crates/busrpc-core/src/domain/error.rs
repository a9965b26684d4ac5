//! RPC error taxonomy.
//!
//! Argument and state errors are raised before any side effect. Timeouts and
//! transport failures reach only the waiter they belong to.

use crate::domain::config::ConfigError;
use busrpc_bus::TransportError;
use busrpc_types::{CorrelationId, EnvelopeError, SessionId};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors surfaced by the client orchestrator, the server and the registries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Caller passed an unusable argument (e.g. timeout out of range).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation requires `start()` first.
    #[error("client not started")]
    NotStarted,

    #[error("session already exists: {0}")]
    SessionExists(SessionId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is not active: {0}")]
    SessionInactive(SessionId),

    /// A live pending entry already uses this correlation id.
    #[error("correlation id already pending: {0}")]
    DuplicateCorrelation(CorrelationId),

    /// No response arrived before the deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The waiter was dropped without a resolution.
    #[error("wait interrupted")]
    Interrupted,

    /// The pending request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The owning client shut down while the request was pending.
    #[error("shutdown: {0}")]
    Shutdown(String),

    /// Admission control: pending-request ceiling reached.
    #[error("too many pending requests (limit {limit})")]
    TooManyPendingRequests { limit: usize },

    /// Admission control: session ceiling reached.
    #[error("too many active sessions (limit {limit})")]
    TooManySessions { limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RpcError {
    /// True for admission-control rejections.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            RpcError::TooManyPendingRequests { .. } | RpcError::TooManySessions { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}
