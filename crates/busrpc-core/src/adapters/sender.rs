//! Sender adapter.
//!
//! Thin wrapper over the transport's publish operations. The transport is
//! shared between clients and servers of one process, so stopping the
//! adapter never shuts the transport down.

use busrpc_bus::{PublishCallback, TransportError, TransportPtr};
use busrpc_types::Properties;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Publishing side of a client or server.
pub struct SenderAdapter {
    transport: TransportPtr,
    started: AtomicBool,
}

impl SenderAdapter {
    pub fn new(transport: TransportPtr) -> Self {
        Self {
            transport,
            started: AtomicBool::new(false),
        }
    }

    /// Start the underlying transport producer. Idempotent.
    pub async fn start(&self) -> Result<(), TransportError> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.transport.start().await?;
        self.started.store(true, Ordering::Release);
        debug!("Sender adapter started");
        Ok(())
    }

    /// Stop accepting publishes through this adapter.
    pub fn shutdown(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            debug!("Sender adapter stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(TransportError::NotStarted)
        }
    }

    /// Publish and wait for the transport to accept the message.
    pub async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
    ) -> Result<(), TransportError> {
        self.ensure_started()?;
        self.transport.publish(channel, payload, properties).await
    }

    /// Publish into the partition owned by `ordering_key`.
    pub async fn publish_ordered(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        ordering_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_started()?;
        self.transport
            .publish_ordered(channel, payload, properties, ordering_key)
            .await
    }

    /// Publish without waiting; `on_result` receives the outcome.
    pub fn publish_async(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        on_result: PublishCallback,
    ) {
        if let Err(e) = self.ensure_started() {
            on_result(Err(e));
            return;
        }
        self.transport
            .publish_async(channel, payload, properties, on_result);
    }
}
