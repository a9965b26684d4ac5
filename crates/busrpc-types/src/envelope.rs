//! # Request and Response Envelopes
//!
//! Immutable records of one request and its answer. They exist only on the
//! wire and inside in-flight bookkeeping; nothing here is ever persisted.

use crate::errors::EnvelopeError;
use crate::ids::{CorrelationId, SenderId, SessionId};
use crate::metadata::{keys, MessageMetadata, MessageType, Properties};
use crate::{now_millis, Timestamp};
use bytes::Bytes;
use std::time::Duration;

/// Smallest accepted per-request timeout.
pub const MIN_TIMEOUT_MS: u64 = 1;

/// Largest accepted per-request timeout (5 minutes).
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Timeout assumed for requests that arrive without a `timeoutMs` property.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A request as issued by a client.
///
/// Single requests have no session id. End-of-stream markers carry both the
/// session id and the correlation id reserved when the session started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    correlation_id: CorrelationId,
    sender_id: SenderId,
    session_id: Option<SessionId>,
    payload: Bytes,
    created_at: Timestamp,
    timeout: Duration,
}

impl RequestEnvelope {
    /// Build a request, validating the timeout range.
    pub fn new(
        correlation_id: CorrelationId,
        sender_id: SenderId,
        session_id: Option<SessionId>,
        payload: Bytes,
        timeout_ms: u64,
    ) -> Result<Self, EnvelopeError> {
        validate_timeout(timeout_ms)?;
        Ok(Self {
            correlation_id,
            sender_id,
            session_id,
            payload,
            created_at: now_millis(),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Rebuild a request from an inbound payload and its properties.
    pub fn from_parts(payload: Bytes, props: &Properties) -> Result<Self, EnvelopeError> {
        let metadata = MessageMetadata::from_properties(props)?;
        if metadata.message_type() != MessageType::Request {
            return Err(EnvelopeError::InvalidValue {
                key: keys::MESSAGE_TYPE,
                value: metadata.message_type().to_string(),
            });
        }
        let correlation_id = metadata
            .correlation_id()
            .ok_or(EnvelopeError::MissingKey(keys::CORRELATION_ID))?;
        let sender_id = metadata
            .sender_id()
            .cloned()
            .ok_or(EnvelopeError::MissingSenderId)?;

        let timeout_ms = match props.get(keys::TIMEOUT_MS) {
            Some(raw) => raw.parse().map_err(|_| EnvelopeError::InvalidValue {
                key: keys::TIMEOUT_MS,
                value: raw.clone(),
            })?,
            None => DEFAULT_TIMEOUT_MS,
        };
        validate_timeout(timeout_ms)?;

        Ok(Self {
            correlation_id,
            sender_id,
            session_id: metadata.session_id(),
            payload,
            created_at: metadata.timestamp(),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn sender_id(&self) -> &SenderId {
        &self.sender_id
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True for the marker that closes a streaming session.
    pub fn is_end_of_stream(&self) -> bool {
        self.session_id.is_some()
    }

    /// REQUEST metadata for this envelope.
    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata::request(
            Some(self.correlation_id),
            self.sender_id.clone(),
            self.session_id,
        )
    }

    /// Transport properties, including the caller's timeout.
    pub fn to_properties(&self) -> Properties {
        let mut props = self.metadata().to_properties();
        props.insert(
            keys::TIMEOUT_MS.to_string(),
            self.timeout.as_millis().to_string(),
        );
        props
    }
}

/// The answer to exactly one request (or to a session's end marker).
///
/// Incremental responses of a bidirectional session carry the session id
/// and no correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    correlation_id: Option<CorrelationId>,
    session_id: Option<SessionId>,
    payload: Bytes,
    timestamp: Timestamp,
    success: bool,
    error: Option<String>,
}

impl ResponseEnvelope {
    /// A successful response to `correlation_id`.
    pub fn success(correlation_id: CorrelationId, payload: Bytes) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            session_id: None,
            payload,
            timestamp: now_millis(),
            success: true,
            error: None,
        }
    }

    /// A failed response to `correlation_id`.
    ///
    /// An empty description is replaced so a failure always explains itself.
    pub fn failure(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unspecified error".to_string();
        }
        Self {
            correlation_id: Some(correlation_id),
            session_id: None,
            payload: Bytes::new(),
            timestamp: now_millis(),
            success: false,
            error: Some(error),
        }
    }

    /// An incremental response delivered to a session's callback.
    pub fn incremental(session_id: SessionId, payload: Bytes) -> Self {
        Self {
            correlation_id: None,
            session_id: Some(session_id),
            payload,
            timestamp: now_millis(),
            success: true,
            error: None,
        }
    }

    /// Rebuild a response from an inbound payload and its decoded metadata.
    pub fn from_parts(
        payload: Bytes,
        metadata: &MessageMetadata,
        props: &Properties,
    ) -> Result<Self, EnvelopeError> {
        let success = match props.get(keys::STATUS).map(String::as_str) {
            None | Some(keys::STATUS_OK) => true,
            Some(keys::STATUS_ERROR) => false,
            Some(other) => {
                return Err(EnvelopeError::InvalidValue {
                    key: keys::STATUS,
                    value: other.to_string(),
                })
            }
        };
        let error = props.get(keys::ERROR).filter(|e| !e.is_empty()).cloned();

        match (success, &error) {
            (true, Some(_)) => return Err(EnvelopeError::UnexpectedErrorDescription),
            (false, None) => return Err(EnvelopeError::MissingErrorDescription),
            _ => {}
        }

        Ok(Self {
            correlation_id: metadata.correlation_id(),
            session_id: metadata.session_id(),
            payload,
            timestamp: metadata.timestamp(),
            success,
            error,
        })
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// RESPONSE metadata for this envelope.
    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata::response(self.correlation_id, self.session_id)
    }

    /// Transport properties, including status and error text.
    pub fn to_properties(&self) -> Properties {
        let mut props = self.metadata().to_properties();
        let status = if self.success {
            keys::STATUS_OK
        } else {
            keys::STATUS_ERROR
        };
        props.insert(keys::STATUS.to_string(), status.to_string());
        if let Some(error) = &self.error {
            props.insert(keys::ERROR.to_string(), error.clone());
        }
        props
    }
}

fn validate_timeout(timeout_ms: u64) -> Result<(), EnvelopeError> {
    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
        return Err(EnvelopeError::TimeoutOutOfRange {
            timeout_ms,
            min_ms: MIN_TIMEOUT_MS,
            max_ms: MAX_TIMEOUT_MS,
        });
    }
    Ok(())
}
