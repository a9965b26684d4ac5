//! # Error Types
//!
//! Invariant violations detected while building or decoding envelopes.

use thiserror::Error;

/// Errors raised by envelope and metadata construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Sender id is empty.
    #[error("sender id must not be empty")]
    EmptySenderId,

    /// A REQUEST metadata block arrived without a sender id.
    #[error("request metadata is missing a sender id")]
    MissingSenderId,

    /// Timeout outside the accepted range.
    #[error("timeout {timeout_ms}ms outside [{min_ms}, {max_ms}]")]
    TimeoutOutOfRange {
        timeout_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    /// Failure response without an error description.
    #[error("failed response requires an error description")]
    MissingErrorDescription,

    /// Success response carrying an error description.
    #[error("successful response must not carry an error description")]
    UnexpectedErrorDescription,

    /// Correlation id could not be parsed.
    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    /// Session id could not be parsed.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// A required metadata key is absent.
    #[error("missing metadata key: {0}")]
    MissingKey(&'static str),

    /// A metadata value could not be parsed.
    #[error("invalid value for metadata key {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
