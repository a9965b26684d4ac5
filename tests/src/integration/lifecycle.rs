//! # Lifecycle, Admission and Timeouts

use super::Harness;
use async_trait::async_trait;
use busrpc_bus::{InMemoryTransport, Transport, TransportPtr};
use busrpc_core::{RequestHandler, RpcClient, RpcConfig, RpcError};
use busrpc_node::handlers::EchoHandler;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Answers after ten seconds.
struct SlowHandler;

#[async_trait]
impl RequestHandler for SlowHandler {
    async fn process_request(&self, payload: Bytes) -> anyhow::Result<Bytes> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(payload)
    }

    async fn process_stream(&self, payloads: Vec<Bytes>) -> anyhow::Result<Bytes> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Bytes::from(payloads.concat()))
    }
}

#[tokio::test]
async fn test_requests_before_start_are_rejected() {
    let transport: TransportPtr = Arc::new(InMemoryTransport::new());
    transport.start().await.unwrap();
    let client = RpcClient::new(RpcConfig::default(), transport).unwrap();

    let err = client
        .send_sync(Bytes::from_static(b"early"), 1_000)
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::NotStarted);
    assert_eq!(client.send_streaming_start().unwrap_err(), RpcError::NotStarted);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_start_and_close_are_idempotent() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    harness.client.start().await.unwrap();
    harness.server.start().await.unwrap();
    assert!(harness.client.is_active());

    harness.client.close().await.unwrap();
    harness.client.close().await.unwrap();
    assert!(!harness.client.is_active());

    let err = harness
        .client
        .send(Bytes::from_static(b"after close"))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::NotStarted);

    harness.stop().await;
}

#[tokio::test]
async fn test_out_of_range_timeouts_are_rejected() {
    let config = RpcConfig {
        max_timeout_ms: 10_000,
        default_timeout_ms: 5_000,
        ..RpcConfig::default()
    };
    let harness = Harness::start(config, Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    for timeout_ms in [0, 10_001] {
        let err = client
            .send_sync(Bytes::from_static(b"x"), timeout_ms)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)), "{timeout_ms}: {err}");
    }

    // A rejected end leaves the session open.
    let session_id = client.send_streaming_start().unwrap();
    let err = client.send_streaming_end(session_id, 0).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidArgument(_)));
    assert!(client.active_session(session_id).is_ok());
    assert_eq!(client.pending_count(), 0);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_and_late_reply_is_dropped() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(SlowHandler)).await;
    let client = &harness.client;

    let started = tokio::time::Instant::now();
    let err = client
        .send_sync(Bytes::from_static(b"slow"), 200)
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout { timeout_ms: 200 });
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_count(), 0);

    // Let the handler finish; its reply finds no pending entry.
    tokio::time::sleep(Duration::from_secs(15)).await;
    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.requests_timed_out, 1);
    assert_eq!(snapshot.requests_succeeded, 0);
    assert_eq!(harness.server.metrics().snapshot().requests_handled, 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_end_timeout_removes_session() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(SlowHandler)).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    client
        .send_streaming_message(session_id, Bytes::from_static(b"chunk"))
        .await
        .unwrap();

    let err = client.send_streaming_end(session_id, 300).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        client.session(session_id).unwrap_err(),
        RpcError::SessionNotFound(session_id)
    );
    assert_eq!(client.pending_count(), 0);

    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.sessions_completed, 0);
    assert_eq!(snapshot.sessions_active, 0);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pending_request_cap_rejects_immediately() {
    let config = RpcConfig {
        max_pending_requests: 2,
        ..RpcConfig::default()
    };
    let harness = Harness::start(config, Arc::new(SlowHandler)).await;
    let client = &harness.client;

    let first = client.send_async(Bytes::from_static(b"1"), 60_000);
    let second = client.send_async(Bytes::from_static(b"2"), 60_000);
    assert_eq!(client.pending_count(), 2);

    let third = client.send_async(Bytes::from_static(b"3"), 60_000);
    assert!(third.correlation_id().is_none());
    let err = third.await.unwrap_err();
    assert_eq!(err, RpcError::TooManyPendingRequests { limit: 2 });
    assert!(err.is_backpressure());
    assert_eq!(client.metrics().snapshot().requests_rejected, 1);
    assert_eq!(client.pending_count(), 2);

    // Closing resolves the admitted waiters instead of leaving them hanging.
    client.close().await.unwrap();
    assert_eq!(
        first.await.unwrap_err(),
        RpcError::Shutdown("client closed".to_string())
    );
    assert_eq!(
        second.await.unwrap_err(),
        RpcError::Shutdown("client closed".to_string())
    );
    assert_eq!(client.pending_count(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_session_cap_rejects_until_a_session_ends() {
    let config = RpcConfig {
        max_active_sessions: 1,
        ..RpcConfig::default()
    };
    let harness = Harness::start(config, Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    assert_eq!(
        client.send_streaming_start().unwrap_err(),
        RpcError::TooManySessions { limit: 1 }
    );

    client.send_streaming_end(session_id, 5_000).await.unwrap();
    assert!(client.send_streaming_start().is_ok());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_resolves_stream_end_waiter() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(SlowHandler)).await;
    let client = Arc::new(RpcClient::new(
        harness.client.config().clone(),
        harness.transport.clone(),
    )
    .unwrap());
    client.start().await.unwrap();

    let session_id = client.send_streaming_start().unwrap();
    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.send_streaming_end(session_id, 60_000).await })
    };

    while client.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    client.close().await.unwrap();

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Shutdown(_)));
    assert_eq!(client.active_session_count(), 0);

    harness.stop().await;
}
