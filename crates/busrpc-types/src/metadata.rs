//! # Message Metadata
//!
//! The subset of a request/response carried as transport-level properties
//! rather than body bytes.
//!
//! ## Wire Keys
//!
//! | Key | Present on | Meaning |
//! |-----|-----------|---------|
//! | `correlationId` | single requests, end markers, correlated responses | reply matching |
//! | `senderId` | every REQUEST | reply routing |
//! | `sessionId` | streaming messages, incremental responses | session routing |
//! | `messageType` | all | `REQUEST` or `RESPONSE` |
//! | `timestamp` | all | ms since Unix epoch |
//! | `timeoutMs` | requests | caller deadline |
//! | `status` | responses | `OK` or `ERROR` |
//! | `error` | failed responses | error description |

use crate::errors::EnvelopeError;
use crate::ids::{CorrelationId, SenderId, SessionId};
use crate::{now_millis, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Key/value attributes attached to a message at publish time.
pub type Properties = HashMap<String, String>;

/// Property key names.
pub mod keys {
    pub const CORRELATION_ID: &str = "correlationId";
    pub const SENDER_ID: &str = "senderId";
    pub const SESSION_ID: &str = "sessionId";
    pub const MESSAGE_TYPE: &str = "messageType";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TIMEOUT_MS: &str = "timeoutMs";
    pub const STATUS: &str = "status";
    pub const ERROR: &str = "error";

    pub const STATUS_OK: &str = "OK";
    pub const STATUS_ERROR: &str = "ERROR";
}

/// Direction tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Request,
    Response,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
        }
    }

    fn parse(value: &str) -> Result<Self, EnvelopeError> {
        match value {
            "REQUEST" => Ok(MessageType::Request),
            "RESPONSE" => Ok(MessageType::Response),
            other => Err(EnvelopeError::InvalidValue {
                key: keys::MESSAGE_TYPE,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation metadata attached to every message.
///
/// A REQUEST block always carries a sender id; the constructors and the
/// decoder both enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    correlation_id: Option<CorrelationId>,
    sender_id: Option<SenderId>,
    session_id: Option<SessionId>,
    message_type: MessageType,
    timestamp: Timestamp,
}

impl MessageMetadata {
    /// REQUEST metadata. `correlation_id` is `None` for mid-stream chunks.
    pub fn request(
        correlation_id: Option<CorrelationId>,
        sender_id: SenderId,
        session_id: Option<SessionId>,
    ) -> Self {
        Self {
            correlation_id,
            sender_id: Some(sender_id),
            session_id,
            message_type: MessageType::Request,
            timestamp: now_millis(),
        }
    }

    /// RESPONSE metadata.
    pub fn response(correlation_id: Option<CorrelationId>, session_id: Option<SessionId>) -> Self {
        Self {
            correlation_id,
            sender_id: None,
            session_id,
            message_type: MessageType::Response,
            timestamp: now_millis(),
        }
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn sender_id(&self) -> Option<&SenderId> {
        self.sender_id.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Encode as transport properties.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::with_capacity(5);
        if let Some(id) = self.correlation_id {
            props.insert(keys::CORRELATION_ID.to_string(), id.to_string());
        }
        if let Some(sender) = &self.sender_id {
            props.insert(keys::SENDER_ID.to_string(), sender.to_string());
        }
        if let Some(session) = self.session_id {
            props.insert(keys::SESSION_ID.to_string(), session.to_string());
        }
        props.insert(
            keys::MESSAGE_TYPE.to_string(),
            self.message_type.as_str().to_string(),
        );
        props.insert(keys::TIMESTAMP.to_string(), self.timestamp.to_string());
        props
    }

    /// Decode from transport properties.
    ///
    /// Unknown keys are ignored. Empty values count as absent.
    pub fn from_properties(props: &Properties) -> Result<Self, EnvelopeError> {
        let message_type = props
            .get(keys::MESSAGE_TYPE)
            .ok_or(EnvelopeError::MissingKey(keys::MESSAGE_TYPE))
            .and_then(|v| MessageType::parse(v))?;

        let correlation_id = non_empty(props, keys::CORRELATION_ID)
            .map(CorrelationId::parse)
            .transpose()?;
        let session_id = non_empty(props, keys::SESSION_ID)
            .map(SessionId::parse)
            .transpose()?;
        let sender_id = non_empty(props, keys::SENDER_ID)
            .map(SenderId::new)
            .transpose()?;

        if message_type == MessageType::Request && sender_id.is_none() {
            return Err(EnvelopeError::MissingSenderId);
        }

        let timestamp = match props.get(keys::TIMESTAMP) {
            Some(raw) => raw.parse().map_err(|_| EnvelopeError::InvalidValue {
                key: keys::TIMESTAMP,
                value: raw.clone(),
            })?,
            None => now_millis(),
        };

        Ok(Self {
            correlation_id,
            sender_id,
            session_id,
            message_type,
            timestamp,
        })
    }
}

fn non_empty<'a>(props: &'a Properties, key: &str) -> Option<&'a str> {
    props
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
