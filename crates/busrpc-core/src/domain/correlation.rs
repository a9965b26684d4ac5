//! Correlation Registry - pending request bookkeeping with timeout enforcement.
//!
//! Flow:
//! 1. Caller reserves a correlation id and calls `register()` to get a waiter
//! 2. Request goes out carrying that id
//! 3. Reply dispatcher calls `complete()` with the inbound response
//! 4. Waiter resolves with the response, or with `Timeout` when the
//!    per-entry timer fires first
//!
//! Response and timeout race on a single `remove` of the entry. Whoever
//! removes it resolves the waiter; the loser finds nothing and does nothing.
//! Timers compare a generation number so a stale timer can never remove a
//! newer entry that reused the id.

use crate::domain::error::{RpcError, RpcResult};
use crate::domain::metrics::RpcMetrics;
use busrpc_types::{CorrelationId, ResponseEnvelope};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a waiter eventually resolves to.
pub type RpcOutcome = RpcResult<ResponseEnvelope>;

struct PendingEntry {
    sender: oneshot::Sender<RpcOutcome>,
    generation: u64,
    created_at: Instant,
    timeout: Duration,
    timer: Option<JoinHandle<()>>,
}

impl PendingEntry {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// State shared with the timer tasks.
struct Shared {
    pending: DashMap<CorrelationId, PendingEntry>,
    /// Live entries plus in-flight reservations
    live: AtomicUsize,
    metrics: Option<Arc<RpcMetrics>>,
}

impl Shared {
    fn take(&self, id: &CorrelationId) -> Option<PendingEntry> {
        let (_, mut entry) = self.pending.remove(id)?;
        self.live.fetch_sub(1, Ordering::AcqRel);
        entry.stop_timer();
        Some(entry)
    }

    fn expire(&self, id: CorrelationId, generation: u64) {
        let Some((_, entry)) = self
            .pending
            .remove_if(&id, |_, entry| entry.generation == generation)
        else {
            return;
        };
        self.live.fetch_sub(1, Ordering::AcqRel);

        let timeout_ms = entry.timeout.as_millis() as u64;
        warn!(
            correlation_id = %id,
            timeout_ms = timeout_ms,
            "Pending request timed out"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_timeout();
        }
        let _ = entry.sender.send(Err(RpcError::Timeout { timeout_ms }));
    }
}

/// Thread-safe map from correlation id to a pending waiter.
pub struct CorrelationRegistry {
    shared: Arc<Shared>,
    next_generation: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Registry that reports outcomes and latency to `metrics`.
    pub fn with_metrics(metrics: Arc<RpcMetrics>) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<Arc<RpcMetrics>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                live: AtomicUsize::new(0),
                metrics,
            }),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Register `id` and schedule its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, id: CorrelationId, timeout: Duration) -> RpcResult<ResponseWaiter> {
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        self.insert(id, timeout)
    }

    /// Register `id` only while fewer than `max_pending` entries are live.
    ///
    /// The slot is reserved atomically, so concurrent callers can never push
    /// the count past `max_pending`.
    pub fn register_bounded(
        &self,
        id: CorrelationId,
        timeout: Duration,
        max_pending: usize,
    ) -> RpcResult<ResponseWaiter> {
        self.shared
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < max_pending).then_some(live + 1)
            })
            .map_err(|_| RpcError::TooManyPendingRequests { limit: max_pending })?;
        self.insert(id, timeout)
    }

    /// Insert after a slot has been reserved in `live`.
    fn insert(&self, id: CorrelationId, timeout: Duration) -> RpcResult<ResponseWaiter> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.shared.pending.entry(id) {
            Entry::Occupied(_) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                return Err(RpcError::DuplicateCorrelation(id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    sender: tx,
                    generation,
                    created_at: Instant::now(),
                    timeout,
                    timer: None,
                });
            }
        }

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(id, generation);
            }
        });

        match self.shared.pending.get_mut(&id) {
            Some(mut entry) if entry.generation == generation => entry.timer = Some(timer),
            // Already resolved between insert and here.
            _ => timer.abort(),
        }

        debug!(
            correlation_id = %id,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        Ok(ResponseWaiter {
            correlation_id: id,
            rx,
        })
    }

    /// Resolve the waiter for `response.correlation_id()`.
    ///
    /// Returns true iff a live entry existed. Unknown ids are a no-op.
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let Some(id) = response.correlation_id() else {
            return false;
        };
        let Some(entry) = self.shared.take(&id) else {
            debug!(correlation_id = %id, "No pending entry for response");
            return false;
        };

        let latency = entry.created_at.elapsed();
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_response(response.is_success(), latency);
        }
        debug!(
            correlation_id = %id,
            success = response.is_success(),
            latency_ms = latency.as_millis() as u64,
            "Completed pending request"
        );
        if entry.sender.send(Ok(response)).is_err() {
            debug!(correlation_id = %id, "Waiter dropped before completion");
        }
        true
    }

    /// Resolve the waiter for `id` with `Cancelled`.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.fail(id, RpcError::Cancelled)
    }

    /// Resolve the waiter for `id` with an arbitrary error.
    pub fn fail(&self, id: &CorrelationId, error: RpcError) -> bool {
        let Some(entry) = self.shared.take(id) else {
            return false;
        };
        if let Some(metrics) = &self.shared.metrics {
            if error.is_timeout() {
                metrics.record_timeout();
            } else {
                metrics.record_failure();
            }
        }
        debug!(correlation_id = %id, error = %error, "Failed pending request");
        let _ = entry.sender.send(Err(error));
        true
    }

    /// Resolve every live waiter with `Shutdown(reason)` and clear the map.
    ///
    /// Returns the number of waiters resolved.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self
            .shared
            .pending
            .iter()
            .map(|entry| *entry.key())
            .collect();

        let resolved = ids
            .iter()
            .filter(|id| self.fail(id, RpcError::Shutdown(reason.to_string())))
            .count();
        if resolved > 0 {
            debug!(resolved = resolved, reason = reason, "Cancelled all pending requests");
        }
        resolved
    }

    pub fn pending_count(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.shared.pending.contains_key(id)
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CorrelationRegistry {
    fn drop(&mut self) {
        for mut entry in self.shared.pending.iter_mut() {
            entry.stop_timer();
        }
    }
}

/// Future resolving to the outcome of one registered request.
///
/// Dropping the waiter does not remove the entry; it expires with its timer.
#[derive(Debug)]
#[must_use = "a waiter does nothing unless awaited"]
pub struct ResponseWaiter {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<RpcOutcome>,
}

impl ResponseWaiter {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl Future for ResponseWaiter {
    type Output = RpcOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Interrupted)),
            Poll::Pending => Poll::Pending,
        }
    }
}
