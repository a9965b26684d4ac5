//! Receiver adapter.
//!
//! Subscribes exactly one dispatch callback to one channel for the lifetime
//! of its owner.

use busrpc_bus::{MessageHandler, SubscriptionId, TransportError, TransportPtr};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

struct Subscription {
    id: SubscriptionId,
    channel: String,
}

/// Consuming side of a client or server.
pub struct ReceiverAdapter {
    transport: TransportPtr,
    subscription: Mutex<Option<Subscription>>,
}

impl ReceiverAdapter {
    pub fn new(transport: TransportPtr) -> Self {
        Self {
            transport,
            subscription: Mutex::new(None),
        }
    }

    /// Start the transport consumer and subscribe `handler` to `channel`.
    ///
    /// A second call while subscribed is a no-op.
    pub async fn start(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        self.transport.start().await?;
        let id = self.transport.subscribe(channel, handler).await?;
        *self.subscription.lock() = Some(Subscription {
            id,
            channel: channel.to_string(),
        });
        debug!(channel = %channel, subscription = %id, "Receiver adapter subscribed");
        Ok(())
    }

    /// Remove the subscription. No-op when not subscribed.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let Some(subscription) = self.subscription.lock().take() else {
            return Ok(());
        };
        match self.transport.unsubscribe(subscription.id).await {
            // A closed transport already dropped every subscriber.
            Ok(()) | Err(TransportError::Closed) => {
                debug!(channel = %subscription.channel, "Receiver adapter unsubscribed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort unsubscribe from a synchronous context.
    ///
    /// Spawns the unsubscribe on the current runtime, if there is one.
    pub fn detach(&self) {
        let Some(subscription) = self.subscription.lock().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = self.transport.clone();
                handle.spawn(async move {
                    let _ = transport.unsubscribe(subscription.id).await;
                });
            }
            Err(_) => warn!(
                channel = %subscription.channel,
                "No runtime available to unsubscribe receiver"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Channel currently subscribed to.
    pub fn channel(&self) -> Option<String> {
        self.subscription
            .lock()
            .as_ref()
            .map(|subscription| subscription.channel.clone())
    }
}
