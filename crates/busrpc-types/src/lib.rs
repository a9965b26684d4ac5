//! # busrpc Types
//!
//! Value types shared by the transport, the client orchestrator, and the
//! server dispatcher.
//!
//! ## Design Principles
//!
//! - **Immutable envelopes**: `RequestEnvelope` and `ResponseEnvelope` are
//!   validated once at construction and never mutated afterwards.
//! - **Metadata is the wire contract**: correlation, sender, session, and
//!   message type travel as transport properties, never inside the payload.
//! - **No behavior**: registries and orchestration live in `busrpc-core`.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod metadata;

pub use envelope::{
    RequestEnvelope, ResponseEnvelope, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
pub use errors::EnvelopeError;
pub use ids::{CorrelationId, SenderId, SessionId};
pub use metadata::{keys, MessageMetadata, MessageType, Properties};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}
