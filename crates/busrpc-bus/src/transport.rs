//! # Transport Contract
//!
//! What the RPC core requires from a message transport, and nothing more.
//! Broker connection setup, authentication, and envelope encoding belong to
//! the concrete implementation.

use async_trait::async_trait;
use busrpc_types::Properties;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// `start()` has not been called yet.
    #[error("transport not started")]
    NotStarted,

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// No subscription with this id exists.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// The broker refused the message.
    #[error("publish to {channel} failed: {reason}")]
    PublishFailed { channel: String, reason: String },
}

/// Handle identifying one `subscribe` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked once per inbound message.
///
/// The transport awaits each call before delivering the next message of the
/// same partition, so implementations that must preserve order simply do
/// their work inline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, payload: Bytes, properties: Properties);
}

/// Completion callback for [`Transport::publish_async`].
pub type PublishCallback = Box<dyn FnOnce(Result<(), TransportError>) + Send + 'static>;

/// Topic-based publish/subscribe transport.
///
/// Implementations guarantee that all messages published with the same
/// ordering key land in one partition and are delivered in send order to
/// that partition's consumer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bring the producer and consumer sides up. Idempotent.
    async fn start(&self) -> Result<(), TransportError>;

    /// Tear the transport down. Later publishes fail with `Closed`.
    async fn shutdown(&self) -> Result<(), TransportError>;

    /// Publish and wait for the transport to accept the message.
    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
    ) -> Result<(), TransportError>;

    /// Publish into the partition selected by `ordering_key`.
    async fn publish_ordered(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        ordering_key: &str,
    ) -> Result<(), TransportError>;

    /// Publish without blocking; `on_result` fires once the outcome is known.
    fn publish_async(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        on_result: PublishCallback,
    );

    /// Register `handler` for every message delivered on `channel`.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, TransportError>;

    /// Remove a registration made by `subscribe`.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError>;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn Transport>;
