//! # RPC Server
//!
//! Consumes the shared request channel and answers on each sender's reply
//! channel.
//!
//! | Metadata | Meaning | Action |
//! |----------|---------|--------|
//! | no session id | single request | `process_request`, reply |
//! | session id, no correlation id | mid-stream chunk | accumulate, optional incremental reply |
//! | session id + correlation id | end-of-stream marker | `process_stream` over the accumulation, reply |
//!
//! Handler errors and panics become failure responses. The end-of-stream
//! reply carries no session id, so it always completes the waiter.

use crate::adapters::{ReceiverAdapter, SenderAdapter};
use crate::domain::{RpcConfig, RpcMetrics, RpcResult};
use crate::ports::RequestHandler;
use async_trait::async_trait;
use busrpc_bus::{MessageHandler, TransportPtr};
use busrpc_types::{
    CorrelationId, MessageMetadata, MessageType, Properties, RequestEnvelope, ResponseEnvelope,
    SenderId, SessionId,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Payloads received so far for one open session.
struct SessionAccumulator {
    payloads: Vec<Bytes>,
    last_activity: Instant,
}

/// Per-message dispatch logic, shared with the transport subscription.
struct RequestDispatcher {
    handler: Arc<dyn RequestHandler>,
    sender: Arc<SenderAdapter>,
    config: RpcConfig,
    accumulations: DashMap<SessionId, SessionAccumulator>,
    metrics: Arc<RpcMetrics>,
}

type HandlerOutcome<T> = Result<anyhow::Result<T>, Box<dyn Any + Send>>;

impl RequestDispatcher {
    async fn dispatch(&self, payload: Bytes, properties: Properties) {
        let metadata = match MessageMetadata::from_properties(&properties) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "Dropping request with unreadable metadata");
                return;
            }
        };
        if metadata.message_type() != MessageType::Request {
            warn!(
                message_type = %metadata.message_type(),
                "Dropping non-request message on request channel"
            );
            return;
        }
        let Some(sender_id) = metadata.sender_id().cloned() else {
            warn!("Dropping request without sender id");
            return;
        };
        self.metrics.record_bytes_received(payload.len());

        match (metadata.session_id(), metadata.correlation_id()) {
            (None, Some(correlation_id)) => {
                self.handle_single(correlation_id, &sender_id, payload, &properties)
                    .await
            }
            (None, None) => warn!(
                sender_id = %sender_id,
                "Dropping request without correlation id"
            ),
            (Some(session_id), None) => self.handle_chunk(session_id, &sender_id, payload).await,
            (Some(session_id), Some(correlation_id)) => {
                self.handle_end(session_id, correlation_id, &sender_id).await
            }
        }
    }

    async fn handle_single(
        &self,
        correlation_id: CorrelationId,
        sender_id: &SenderId,
        payload: Bytes,
        properties: &Properties,
    ) {
        let request = match RequestEnvelope::from_parts(payload, properties) {
            Ok(request) => request,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Rejecting invalid request");
                let response = ResponseEnvelope::failure(correlation_id, e.to_string());
                self.reply(sender_id, response, None).await;
                return;
            }
        };

        debug!(correlation_id = %correlation_id, sender_id = %sender_id, "Processing request");
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.process_request(request.payload().clone()))
            .catch_unwind()
            .await;
        let response = self.to_response(correlation_id, outcome);
        self.metrics
            .record_request_handled(response.is_success(), started.elapsed());
        self.reply(sender_id, response, None).await;
    }

    async fn handle_chunk(&self, session_id: SessionId, sender_id: &SenderId, payload: Bytes) {
        {
            let mut accumulation = self
                .accumulations
                .entry(session_id)
                .or_insert_with(|| SessionAccumulator {
                    payloads: Vec::new(),
                    last_activity: Instant::now(),
                });
            accumulation.payloads.push(payload.clone());
            accumulation.last_activity = Instant::now();
        }
        self.metrics.record_stream_message_received();
        debug!(session_id = %session_id, "Accumulated stream message");

        let outcome = AssertUnwindSafe(self.handler.process_stream_message(session_id, &payload))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(Some(partial))) => {
                self.reply(
                    sender_id,
                    ResponseEnvelope::incremental(session_id, partial),
                    Some(session_id),
                )
                .await
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(
                session_id = %session_id,
                error = %format!("{e:#}"),
                "Incremental handler failed"
            ),
            Err(panic) => warn!(
                session_id = %session_id,
                panic = %panic_message(panic.as_ref()),
                "Incremental handler panicked"
            ),
        }
    }

    async fn handle_end(
        &self,
        session_id: SessionId,
        correlation_id: CorrelationId,
        sender_id: &SenderId,
    ) {
        let payloads = self
            .accumulations
            .remove(&session_id)
            .map(|(_, accumulation)| accumulation.payloads)
            .unwrap_or_default();
        debug!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            messages = payloads.len(),
            "Processing stream"
        );

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.process_stream(payloads))
            .catch_unwind()
            .await;
        let response = self.to_response(correlation_id, outcome);
        self.metrics
            .record_request_handled(response.is_success(), started.elapsed());
        self.reply(sender_id, response, Some(session_id)).await;
    }

    fn to_response(
        &self,
        correlation_id: CorrelationId,
        outcome: HandlerOutcome<Bytes>,
    ) -> ResponseEnvelope {
        match outcome {
            Ok(Ok(payload)) => ResponseEnvelope::success(correlation_id, payload),
            Ok(Err(e)) => {
                let description = format!("{e:#}");
                warn!(correlation_id = %correlation_id, error = %description, "Handler failed");
                ResponseEnvelope::failure(correlation_id, description)
            }
            Err(panic) => {
                let description = panic_message(panic.as_ref());
                warn!(correlation_id = %correlation_id, panic = %description, "Handler panicked");
                ResponseEnvelope::failure(correlation_id, format!("handler panicked: {description}"))
            }
        }
    }

    /// Publish `response` to the sender's reply channel.
    ///
    /// Replies for a session share its ordering key, so incremental replies
    /// reach the client in chunk order and ahead of the end-of-stream reply.
    async fn reply(
        &self,
        sender_id: &SenderId,
        response: ResponseEnvelope,
        session_id: Option<SessionId>,
    ) {
        let channel = self.config.reply_channel(sender_id);
        self.metrics.record_bytes_sent(response.payload().len());
        let payload = response.payload().clone();
        let properties = response.to_properties();
        let published = match session_id {
            Some(session_id) => {
                self.sender
                    .publish_ordered(&channel, payload, properties, &session_id.ordering_key())
                    .await
            }
            None => self.sender.publish(&channel, payload, properties).await,
        };
        if let Err(e) = published {
            error!(
                channel = %channel,
                correlation_id = ?response.correlation_id(),
                error = %e,
                "Failed to publish reply"
            );
        }
    }

    /// Drop accumulations whose end marker never arrived.
    fn remove_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.accumulations.len();
        self.accumulations.retain(|session_id, accumulation| {
            let idle = now.saturating_duration_since(accumulation.last_activity);
            if idle > max_idle {
                info!(session_id = %session_id, "Discarding stale stream accumulation");
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.accumulations.len())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl MessageHandler for RequestDispatcher {
    async fn on_message(&self, payload: Bytes, properties: Properties) {
        self.dispatch(payload, properties).await;
    }
}

/// Receiving-side counterpart of [`crate::RpcClient`].
pub struct RpcServer {
    config: RpcConfig,
    dispatcher: Arc<RequestDispatcher>,
    sender: Arc<SenderAdapter>,
    receiver: ReceiverAdapter,
    metrics: Arc<RpcMetrics>,
    active: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    pub fn new(
        config: RpcConfig,
        transport: TransportPtr,
        handler: Arc<dyn RequestHandler>,
    ) -> RpcResult<Self> {
        config.validate()?;
        let metrics = Arc::new(RpcMetrics::new());
        let sender = Arc::new(SenderAdapter::new(transport.clone()));
        let dispatcher = Arc::new(RequestDispatcher {
            handler,
            sender: sender.clone(),
            config: config.clone(),
            accumulations: DashMap::new(),
            metrics: metrics.clone(),
        });

        Ok(Self {
            receiver: ReceiverAdapter::new(transport),
            active: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            sweeper: parking_lot::Mutex::new(None),
            config,
            dispatcher,
            sender,
            metrics,
        })
    }

    /// Subscribe to the request channel. Idempotent.
    pub async fn start(&self) -> RpcResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_active() {
            return Ok(());
        }

        self.sender.start().await?;
        if let Err(e) = self
            .receiver
            .start(&self.config.request_channel, self.dispatcher.clone())
            .await
        {
            self.sender.shutdown();
            return Err(e.into());
        }

        let dispatcher = self.dispatcher.clone();
        let period = self.config.session_sweep_interval();
        let max_idle = self.config.session_idle_timeout();
        *self.sweeper.lock() = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = dispatcher.remove_stale(max_idle);
                if removed > 0 {
                    debug!(removed = removed, "Swept stale stream accumulations");
                }
            }
        }));

        self.active.store(true, Ordering::Release);
        info!(channel = %self.config.request_channel, "RPC server started");
        Ok(())
    }

    /// Unsubscribe and drop open accumulations. Idempotent.
    pub async fn close(&self) -> RpcResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let stopped = self.receiver.stop().await;
        self.sender.shutdown();
        let discarded = self.dispatcher.accumulations.len();
        self.dispatcher.accumulations.clear();

        info!(sessions_discarded = discarded, "RPC server closed");
        stopped.map_err(Into::into)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Sessions with chunks received but no end marker yet.
    pub fn open_session_count(&self) -> usize {
        self.dispatcher.accumulations.len()
    }

    pub fn metrics(&self) -> Arc<RpcMetrics> {
        self.metrics.clone()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.receiver.detach();
    }
}
