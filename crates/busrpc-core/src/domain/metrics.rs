//! Passive RPC metrics.
//!
//! Lock-free counters updated by the orchestrator, the registries and the
//! server dispatcher. Nothing here gates control flow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// RPC counters and latency aggregates.
#[derive(Debug)]
pub struct RpcMetrics {
    // Client request outcomes
    pub requests_total: AtomicU64,
    pub requests_succeeded: AtomicU64,
    pub requests_failed: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub requests_rejected: AtomicU64,

    // Latency (ms); min starts at u64::MAX until the first sample
    latency_min_ms: AtomicU64,
    latency_max_ms: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_samples: AtomicU64,

    // Streaming sessions
    pub sessions_total: AtomicU64,
    pub sessions_active: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub stream_messages: AtomicU64,

    // Payload volume
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    // Server side
    pub requests_handled: AtomicU64,
    pub handler_failures: AtomicU64,

    started_at: Instant,
}

impl Default for RpcMetrics {
    fn default() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            latency_min_ms: AtomicU64::new(u64::MAX),
            latency_max_ms: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            stream_messages: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            requests_handled: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

impl RpcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request leaving the client
    pub fn record_request_sent(&self, payload_len: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    /// Record a resolved request (response arrived)
    pub fn record_response(&self, success: bool, latency: Duration) {
        if success {
            self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(latency);
    }

    /// Record a request that failed locally (publish error, cancel, shutdown)
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admission-control rejection
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closed by its end-of-stream response
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.decrement_active_sessions(1);
    }

    /// Record sessions dropped without a successful end (idle, timeout, close)
    pub fn record_sessions_abandoned(&self, count: usize) {
        self.decrement_active_sessions(count as u64);
    }

    pub fn record_stream_message(&self, payload_len: usize) {
        self.stream_messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    /// Count a chunk consumed by a server; its bytes go through
    /// `record_bytes_received`.
    pub fn record_stream_message_received(&self) {
        self.stream_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, len: usize) {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Record one request processed by a server handler
    pub fn record_request_handled(&self, success: bool, latency: Duration) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(latency);
    }

    fn record_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.latency_min_ms.fetch_min(ms, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(ms, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement_active_sessions(&self, count: u64) {
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
                Some(active.saturating_sub(count))
            });
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.latency_sum_ms.load(Ordering::Relaxed);
        let count = self.latency_samples.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of every counter plus derived rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime_secs = self.uptime().as_secs_f64();
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);
        let min = self.latency_min_ms.load(Ordering::Relaxed);
        let rate = |count: u64| {
            if uptime_secs > 0.0 {
                count as f64 / uptime_secs
            } else {
                0.0
            }
        };

        MetricsSnapshot {
            uptime_secs,
            requests_total,
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            latency_min_ms: if min == u64::MAX { 0 } else { min },
            latency_avg_ms: self.average_latency_ms(),
            latency_max_ms: self.latency_max_ms.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            stream_messages: self.stream_messages.load(Ordering::Relaxed),
            bytes_sent,
            bytes_received,
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            requests_per_sec: rate(requests_total),
            throughput_bytes_per_sec: rate(bytes_sent + bytes_received),
        }
    }

    /// Snapshot rendered as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        let counters: [(&str, &str, u64); 13] = [
            ("requests_total", "Requests sent by clients", s.requests_total),
            ("requests_succeeded_total", "Requests answered successfully", s.requests_succeeded),
            ("requests_failed_total", "Requests answered with an error or failed locally", s.requests_failed),
            ("requests_timed_out_total", "Requests that hit their deadline", s.requests_timed_out),
            ("requests_rejected_total", "Requests and sessions rejected by admission control", s.requests_rejected),
            ("sessions_total", "Streaming sessions started", s.sessions_total),
            ("sessions_completed_total", "Streaming sessions ended with a response", s.sessions_completed),
            ("stream_messages_total", "Streamed messages sent", s.stream_messages),
            ("bytes_sent_total", "Payload bytes published", s.bytes_sent),
            ("bytes_received_total", "Payload bytes received", s.bytes_received),
            ("requests_handled_total", "Requests processed by server handlers", s.requests_handled),
            ("handler_failures_total", "Server handler errors and panics", s.handler_failures),
            ("latency_max_ms", "Maximum observed latency", s.latency_max_ms),
        ];
        for (name, help, value) in counters {
            let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
            output.push_str(&format!(
                "# HELP busrpc_{name} {help}\n# TYPE busrpc_{name} {kind}\nbusrpc_{name} {value}\n"
            ));
        }

        output.push_str(&format!(
            "# HELP busrpc_sessions_active Streaming sessions currently open\n\
             # TYPE busrpc_sessions_active gauge\n\
             busrpc_sessions_active {}\n",
            s.sessions_active
        ));
        output.push_str(&format!(
            "# HELP busrpc_latency_avg_ms Average request latency\n\
             # TYPE busrpc_latency_avg_ms gauge\n\
             busrpc_latency_avg_ms {:.2}\n",
            s.latency_avg_ms
        ));
        output.push_str(&format!(
            "# HELP busrpc_uptime_seconds Time since metrics creation\n\
             # TYPE busrpc_uptime_seconds gauge\n\
             busrpc_uptime_seconds {:.3}\n",
            s.uptime_secs
        ));

        output
    }
}

/// Serializable view of [`RpcMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub requests_rejected: u64,
    pub latency_min_ms: u64,
    pub latency_avg_ms: f64,
    pub latency_max_ms: u64,
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub sessions_completed: u64,
    pub stream_messages: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub requests_handled: u64,
    pub handler_failures: u64,
    pub requests_per_sec: f64,
    pub throughput_bytes_per_sec: f64,
}
