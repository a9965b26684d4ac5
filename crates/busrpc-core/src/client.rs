//! # RPC Client
//!
//! The public-facing orchestrator: issues requests and streaming sessions,
//! enforces admission limits, and resolves waiters from its reply channel.
//!
//! ## Flow
//!
//! ```text
//! send_async ─→ CorrelationRegistry::register_bounded ─→ SenderAdapter::publish_async
//!                                                            │
//! reply channel ─→ ReplyDispatcher ─→ CorrelationRegistry::complete ─→ waiter
//!                        └──────────→ session response callback (bidirectional)
//! ```

use crate::adapters::{ReceiverAdapter, SenderAdapter};
use crate::domain::{
    CorrelationRegistry, ResponseCallback, ResponseWaiter, RpcConfig, RpcError, RpcMetrics,
    RpcOutcome, RpcResult, SessionRegistry, StreamingSession,
};
use async_trait::async_trait;
use busrpc_bus::{MessageHandler, TransportPtr};
use busrpc_types::{
    CorrelationId, MessageMetadata, MessageType, Properties, RequestEnvelope, ResponseEnvelope,
    SenderId, SessionId,
};
use bytes::Bytes;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Future returned by [`RpcClient::send_async`].
///
/// Rejected requests resolve immediately with their error.
#[derive(Debug)]
#[must_use = "a response future does nothing unless awaited"]
pub struct ResponseFuture {
    state: FutureState,
}

#[derive(Debug)]
enum FutureState {
    Failed(Option<RpcError>),
    Waiting(ResponseWaiter),
}

impl ResponseFuture {
    fn failed(error: RpcError) -> Self {
        Self {
            state: FutureState::Failed(Some(error)),
        }
    }

    fn waiting(waiter: ResponseWaiter) -> Self {
        Self {
            state: FutureState::Waiting(waiter),
        }
    }

    /// Correlation id of the request, if it was admitted.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match &self.state {
            FutureState::Waiting(waiter) => Some(waiter.correlation_id()),
            FutureState::Failed(_) => None,
        }
    }
}

impl Future for ResponseFuture {
    type Output = RpcOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            FutureState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(RpcError::Interrupted)))
            }
            FutureState::Waiting(waiter) => Pin::new(waiter).poll(cx),
        }
    }
}

/// Request/response and streaming client bound to one sender identity.
pub struct RpcClient {
    config: RpcConfig,
    sender_id: SenderId,
    reply_channel: String,
    correlations: Arc<CorrelationRegistry>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<RpcMetrics>,
    sender: Arc<SenderAdapter>,
    receiver: ReceiverAdapter,
    active: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Client with a random sender id.
    pub fn new(config: RpcConfig, transport: TransportPtr) -> RpcResult<Self> {
        Self::with_sender_id(config, SenderId::random(), transport)
    }

    /// Client with an explicit sender id.
    pub fn with_sender_id(
        config: RpcConfig,
        sender_id: SenderId,
        transport: TransportPtr,
    ) -> RpcResult<Self> {
        config.validate()?;
        let metrics = Arc::new(RpcMetrics::new());
        let reply_channel = config.reply_channel(&sender_id);

        Ok(Self {
            correlations: Arc::new(CorrelationRegistry::with_metrics(metrics.clone())),
            sessions: Arc::new(SessionRegistry::new()),
            sender: Arc::new(SenderAdapter::new(transport.clone())),
            receiver: ReceiverAdapter::new(transport),
            active: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            sweeper: parking_lot::Mutex::new(None),
            config,
            sender_id,
            reply_channel,
            metrics,
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Wire the adapters, subscribe to the reply channel and start the idle
    /// sweep. Idempotent. A failure unwinds whatever was already started.
    pub async fn start(&self) -> RpcResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_active() {
            return Ok(());
        }

        self.sender.start().await?;

        let dispatcher = Arc::new(ReplyDispatcher {
            correlations: self.correlations.clone(),
            sessions: self.sessions.clone(),
            metrics: self.metrics.clone(),
        });
        if let Err(e) = self.receiver.start(&self.reply_channel, dispatcher).await {
            self.sender.shutdown();
            return Err(e.into());
        }

        *self.sweeper.lock() = Some(spawn_session_sweeper(
            self.sessions.clone(),
            self.metrics.clone(),
            self.config.session_sweep_interval(),
            self.config.session_idle_timeout(),
        ));

        self.active.store(true, Ordering::Release);
        info!(
            sender_id = %self.sender_id,
            reply_channel = %self.reply_channel,
            "RPC client started"
        );
        Ok(())
    }

    /// Resolve every waiter with `Shutdown`, drop every session, stop the
    /// sweep and tear down the adapters. Idempotent.
    pub async fn close(&self) -> RpcResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let cancelled = self.correlations.cancel_all("client closed");
        let discarded = self.sessions.clear();
        self.metrics.record_sessions_abandoned(discarded);
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let stopped = self.receiver.stop().await;
        self.sender.shutdown();

        info!(
            sender_id = %self.sender_id,
            cancelled = cancelled,
            sessions_discarded = discarded,
            "RPC client closed"
        );
        stopped.map_err(Into::into)
    }

    // =========================================================================
    // SINGLE REQUESTS
    // =========================================================================

    /// Send `payload` and wait up to `timeout_ms` for the response.
    pub async fn send_sync(&self, payload: Bytes, timeout_ms: u64) -> RpcResult<ResponseEnvelope> {
        let future = self.send_async(payload, timeout_ms);
        let Some(correlation_id) = future.correlation_id() else {
            return future.await;
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = RpcError::Timeout { timeout_ms };
                self.correlations.fail(&correlation_id, error.clone());
                Err(error)
            }
        }
    }

    /// `send_sync` with the configured default timeout.
    pub async fn send(&self, payload: Bytes) -> RpcResult<ResponseEnvelope> {
        self.send_sync(payload, self.config.default_timeout_ms).await
    }

    /// Send `payload` without waiting.
    ///
    /// Rejections (not started, bad timeout, pending cap reached) resolve the
    /// returned future immediately and leave no trace in the registry.
    pub fn send_async(&self, payload: Bytes, timeout_ms: u64) -> ResponseFuture {
        match self.dispatch_request(payload, timeout_ms) {
            Ok(waiter) => ResponseFuture::waiting(waiter),
            Err(e) => ResponseFuture::failed(e),
        }
    }

    fn dispatch_request(&self, payload: Bytes, timeout_ms: u64) -> RpcResult<ResponseWaiter> {
        self.ensure_active()?;
        let timeout = self.validate_timeout(timeout_ms)?;

        let correlation_id = CorrelationId::new();
        let request = RequestEnvelope::new(
            correlation_id,
            self.sender_id.clone(),
            None,
            payload,
            timeout_ms,
        )?;

        let waiter = self
            .correlations
            .register_bounded(correlation_id, timeout, self.config.max_pending_requests)
            .inspect_err(|e| {
                if e.is_backpressure() {
                    self.metrics.record_rejected();
                    warn!(
                        limit = self.config.max_pending_requests,
                        "Request rejected by admission control"
                    );
                }
            })?;
        self.metrics.record_request_sent(request.payload().len());

        let correlations = self.correlations.clone();
        self.sender.publish_async(
            &self.config.request_channel,
            request.payload().clone(),
            request.to_properties(),
            Box::new(move |result| {
                if let Err(e) = result {
                    warn!(correlation_id = %correlation_id, error = %e, "Request publish failed");
                    correlations.fail(&correlation_id, RpcError::Transport(e));
                }
            }),
        );

        debug!(
            correlation_id = %correlation_id,
            timeout_ms = timeout_ms,
            "Request sent"
        );
        Ok(waiter)
    }

    // =========================================================================
    // STREAMING
    // =========================================================================

    /// Open a streaming session and reserve its end-of-stream correlation id.
    pub fn send_streaming_start(&self) -> RpcResult<SessionId> {
        self.ensure_active()?;

        let session = StreamingSession::new(
            SessionId::new(),
            self.sender_id.clone(),
            CorrelationId::new(),
        );
        let session = self
            .sessions
            .register_bounded(session, self.config.max_active_sessions)
            .inspect_err(|e| {
                if e.is_backpressure() {
                    self.metrics.record_rejected();
                    warn!(
                        limit = self.config.max_active_sessions,
                        "Session rejected by admission control"
                    );
                }
            })?;
        self.metrics.record_session_started();

        debug!(
            session_id = %session.session_id(),
            end_correlation_id = %session.end_correlation_id(),
            "Streaming session started"
        );
        Ok(session.session_id())
    }

    /// Send one chunk of an active session, ordered by session id.
    pub async fn send_streaming_message(&self, session_id: SessionId, payload: Bytes) -> RpcResult<()> {
        self.ensure_active()?;
        self.sessions.record_activity(session_id)?;
        self.publish_chunk(session_id, payload).await
    }

    /// Like `send_streaming_message`, and routes incremental responses of
    /// this session to `handler`. Only the first handler per session is kept.
    pub async fn send_bidirectional_message<F>(
        &self,
        session_id: SessionId,
        payload: Bytes,
        handler: F,
    ) -> RpcResult<()>
    where
        F: Fn(ResponseEnvelope) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        self.sessions.record_activity(session_id)?;
        let callback: ResponseCallback = Arc::new(handler);
        if self
            .sessions
            .register_response_handler_if_absent(session_id, callback)?
        {
            debug!(session_id = %session_id, "Registered incremental response handler");
        }
        self.publish_chunk(session_id, payload).await
    }

    async fn publish_chunk(&self, session_id: SessionId, payload: Bytes) -> RpcResult<()> {
        let properties =
            MessageMetadata::request(None, self.sender_id.clone(), Some(session_id))
                .to_properties();
        self.metrics.record_stream_message(payload.len());
        self.sender
            .publish_ordered(
                &self.config.request_channel,
                payload,
                properties,
                &session_id.ordering_key(),
            )
            .await?;
        debug!(session_id = %session_id, "Stream message sent");
        Ok(())
    }

    /// Close the session and wait up to `timeout_ms` for its single response.
    ///
    /// The session is removed on every path once it has been deactivated.
    pub async fn send_streaming_end(
        &self,
        session_id: SessionId,
        timeout_ms: u64,
    ) -> RpcResult<ResponseEnvelope> {
        self.ensure_active()?;
        let timeout = self.validate_timeout(timeout_ms)?;
        let session = self.sessions.deactivate(session_id)?;

        let outcome = self.finish_stream(&session, timeout_ms, timeout).await;

        if self.sessions.remove(session_id) {
            if outcome.is_ok() {
                self.metrics.record_session_completed();
            } else {
                self.metrics.record_sessions_abandoned(1);
            }
        }
        debug!(
            session_id = %session_id,
            messages = session.message_count(),
            success = outcome.is_ok(),
            "Streaming session ended"
        );
        outcome
    }

    async fn finish_stream(
        &self,
        session: &StreamingSession,
        timeout_ms: u64,
        timeout: Duration,
    ) -> RpcResult<ResponseEnvelope> {
        let session_id = session.session_id();
        let correlation_id = session.end_correlation_id();
        let marker = RequestEnvelope::new(
            correlation_id,
            self.sender_id.clone(),
            Some(session_id),
            Bytes::new(),
            timeout_ms,
        )?;

        let waiter = self.correlations.register(correlation_id, timeout)?;
        self.metrics.record_request_sent(0);

        if let Err(e) = self
            .sender
            .publish_ordered(
                &self.config.request_channel,
                Bytes::new(),
                marker.to_properties(),
                &session_id.ordering_key(),
            )
            .await
        {
            self.correlations
                .fail(&correlation_id, RpcError::Transport(e.clone()));
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, waiter).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = RpcError::Timeout { timeout_ms };
                self.correlations.fail(&correlation_id, error.clone());
                Err(error)
            }
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    pub fn sender_id(&self) -> &SenderId {
        &self.sender_id
    }

    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.correlations.pending_count()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.active_count()
    }

    /// Snapshot of a registered session.
    pub fn session(&self, session_id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        self.sessions.get(session_id)
    }

    /// Snapshot of a registered, still-active session.
    pub fn active_session(&self, session_id: SessionId) -> RpcResult<Arc<StreamingSession>> {
        self.sessions.get_active(session_id)
    }

    pub fn metrics(&self) -> Arc<RpcMetrics> {
        self.metrics.clone()
    }

    fn ensure_active(&self) -> RpcResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RpcError::NotStarted)
        }
    }

    fn validate_timeout(&self, timeout_ms: u64) -> RpcResult<Duration> {
        if timeout_ms == 0 || timeout_ms > self.config.max_timeout_ms {
            return Err(RpcError::InvalidArgument(format!(
                "timeout {timeout_ms}ms outside [1, {}]",
                self.config.max_timeout_ms
            )));
        }
        Ok(Duration::from_millis(timeout_ms))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.correlations.cancel_all("client dropped");
        let discarded = self.sessions.clear();
        self.metrics.record_sessions_abandoned(discarded);
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.receiver.detach();
        self.sender.shutdown();
    }
}

fn spawn_session_sweeper(
    sessions: Arc<SessionRegistry>,
    metrics: Arc<RpcMetrics>,
    period: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = sessions.remove_idle(max_idle);
            if evicted > 0 {
                metrics.record_sessions_abandoned(evicted);
                debug!(evicted = evicted, "Swept idle streaming sessions");
            }
        }
    })
}

/// Routes each inbound reply to a session callback or a pending waiter.
struct ReplyDispatcher {
    correlations: Arc<CorrelationRegistry>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<RpcMetrics>,
}

impl ReplyDispatcher {
    fn dispatch(&self, payload: Bytes, properties: &Properties) {
        let metadata = match MessageMetadata::from_properties(properties) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "Dropping reply with unreadable metadata");
                return;
            }
        };
        if metadata.message_type() != MessageType::Response {
            warn!(
                message_type = %metadata.message_type(),
                "Dropping non-response message on reply channel"
            );
            return;
        }
        self.metrics.record_bytes_received(payload.len());

        let response = match ResponseEnvelope::from_parts(payload, &metadata, properties) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Dropping malformed response");
                if let Some(id) = metadata.correlation_id() {
                    self.correlations.fail(&id, RpcError::Envelope(e));
                }
                return;
            }
        };

        if let Some(session_id) = response.session_id() {
            if let Some(callback) = self.sessions.response_handler(session_id) {
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback(response))).is_err() {
                    warn!(session_id = %session_id, "Session response handler panicked");
                }
                return;
            }
        }

        let Some(correlation_id) = response.correlation_id() else {
            warn!(
                session_id = ?response.session_id(),
                "Dropping response without correlation id"
            );
            return;
        };
        if !self.correlations.complete(response) {
            warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation ID"
            );
        }
    }
}

#[async_trait]
impl MessageHandler for ReplyDispatcher {
    async fn on_message(&self, payload: Bytes, properties: Properties) {
        self.dispatch(payload, &properties);
    }
}
