//! # In-Memory Transport
//!
//! Reference implementation of [`Transport`] for a single process.
//!
//! Each channel is split into a fixed number of partitions. A partition is an
//! unbounded FIFO queue drained by one worker task, which awaits every
//! handler call before taking the next message. Subscribers of a channel
//! form one consumer group: partition `p` goes to subscriber
//! `p % subscriber_count`.

use crate::transport::{
    MessageHandler, PublishCallback, SubscriptionId, Transport, TransportError,
};
use crate::DEFAULT_PARTITIONS;
use async_trait::async_trait;
use busrpc_types::Properties;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type SubscriberList = Arc<RwLock<Vec<(SubscriptionId, Arc<dyn MessageHandler>)>>>;

struct Delivery {
    payload: Bytes,
    properties: Properties,
}

struct ChannelState {
    partitions: Vec<mpsc::UnboundedSender<Delivery>>,
    subscribers: SubscriberList,
}

impl ChannelState {
    /// Create the partition queues and spawn one worker per partition.
    ///
    /// Must be called from within a tokio runtime.
    fn spawn(channel: &str, partition_count: usize) -> Self {
        let subscribers: SubscriberList = Arc::new(RwLock::new(Vec::new()));
        let partitions = (0..partition_count)
            .map(|partition| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_partition(
                    channel.to_string(),
                    partition,
                    rx,
                    subscribers.clone(),
                ));
                tx
            })
            .collect();

        debug!(channel = %channel, partitions = partition_count, "Channel created");
        Self {
            partitions,
            subscribers,
        }
    }
}

async fn run_partition(
    channel: String,
    partition: usize,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    subscribers: SubscriberList,
) {
    while let Some(delivery) = rx.recv().await {
        let handler = {
            let subs = subscribers.read();
            if subs.is_empty() {
                None
            } else {
                Some(subs[partition % subs.len()].1.clone())
            }
        };

        match handler {
            Some(handler) => {
                handler
                    .on_message(delivery.payload, delivery.properties)
                    .await
            }
            None => warn!(
                channel = %channel,
                partition = partition,
                "Message dropped (no subscribers)"
            ),
        }
    }
    debug!(channel = %channel, partition = partition, "Partition worker stopped");
}

/// FNV-1a; stable across processes so a key always maps to one partition.
fn stable_hash(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// In-process partitioned pub/sub transport.
pub struct InMemoryTransport {
    channels: RwLock<HashMap<String, ChannelState>>,
    partition_count: usize,
    started: AtomicBool,
    closed: AtomicBool,
    round_robin: AtomicUsize,
    next_subscription: AtomicU64,
    messages_published: AtomicU64,
}

impl InMemoryTransport {
    /// Create a transport with [`DEFAULT_PARTITIONS`] partitions per channel.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a transport with `partitions` partitions per channel (min 1).
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            partition_count: partitions.max(1),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            round_robin: AtomicUsize::new(0),
            next_subscription: AtomicU64::new(1),
            messages_published: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Partition a given ordering key maps to.
    #[must_use]
    pub fn partition_for(&self, ordering_key: &str) -> usize {
        (stable_hash(ordering_key) % self.partition_count as u64) as usize
    }

    /// Number of subscribers currently registered on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, |state| state.subscribers.read().len())
    }

    /// Messages accepted since creation.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted);
        }
        Ok(())
    }

    fn enqueue(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        ordering_key: Option<&str>,
    ) -> Result<(), TransportError> {
        self.check_open()?;

        let partition = match ordering_key {
            Some(key) => self.partition_for(key),
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partition_count,
        };
        let delivery = Delivery {
            payload,
            properties,
        };

        {
            let channels = self.channels.read();
            if let Some(state) = channels.get(channel) {
                return self.send(state, partition, delivery);
            }
        }

        let mut channels = self.channels.write();
        let state = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState::spawn(channel, self.partition_count));
        self.send(state, partition, delivery)
    }

    fn send(
        &self,
        state: &ChannelState,
        partition: usize,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        state.partitions[partition]
            .send(delivery)
            .map_err(|_| TransportError::Closed)?;
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !self.started.swap(true, Ordering::AcqRel) {
            info!(partitions = self.partition_count, "In-memory transport started");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the senders lets every worker drain its queue and exit.
        let channels: Vec<_> = self.channels.write().drain().collect();
        info!(channels = channels.len(), "In-memory transport shut down");
        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
    ) -> Result<(), TransportError> {
        self.enqueue(channel, payload, properties, None)
    }

    async fn publish_ordered(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        ordering_key: &str,
    ) -> Result<(), TransportError> {
        self.enqueue(channel, payload, properties, Some(ordering_key))
    }

    fn publish_async(
        &self,
        channel: &str,
        payload: Bytes,
        properties: Properties,
        on_result: PublishCallback,
    ) {
        on_result(self.enqueue(channel, payload, properties, None));
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut channels = self.channels.write();
        let state = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelState::spawn(channel, self.partition_count));
        state.subscribers.write().push((id, handler));

        debug!(channel = %channel, subscription = %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let channels = self.channels.read();
        for (channel, state) in channels.iter() {
            let mut subs = state.subscribers.write();
            if let Some(pos) = subs.iter().position(|(id, _)| *id == subscription) {
                subs.remove(pos);
                debug!(channel = %channel, subscription = %subscription, "Unsubscribed");
                return Ok(());
            }
        }
        Err(TransportError::UnknownSubscription(subscription))
    }
}
