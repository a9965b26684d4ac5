//! # Single Request Round Trips
//!
//! client ─→ `rpc.requests` ─→ server ─→ `rpc.replies.<sender>` ─→ client

use super::Harness;
use async_trait::async_trait;
use busrpc_bus::Transport;
use busrpc_core::{RequestHandler, RpcConfig};
use busrpc_node::handlers::EchoHandler;
use busrpc_types::{CorrelationId, ResponseEnvelope};
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;

struct PanickingHandler;

#[async_trait]
impl RequestHandler for PanickingHandler {
    async fn process_request(&self, _payload: Bytes) -> anyhow::Result<Bytes> {
        panic!("handler exploded");
    }

    async fn process_stream(&self, _payloads: Vec<Bytes>) -> anyhow::Result<Bytes> {
        Ok(Bytes::new())
    }
}

#[tokio::test]
async fn test_echo_round_trip() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let response = harness
        .client
        .send_sync(Bytes::from_static(b"ping"), 5_000)
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.payload(), &Bytes::from_static(b"ping"));
    assert_eq!(harness.client.pending_count(), 0);

    let snapshot = harness.client.metrics().snapshot();
    assert_eq!(snapshot.requests_total, 1);
    assert_eq!(snapshot.requests_succeeded, 1);
    assert_eq!(harness.server.metrics().snapshot().requests_handled, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_send_uses_default_timeout() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let response = harness.client.send(Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(response.into_payload(), Bytes::from_static(b"hello"));

    harness.stop().await;
}

#[tokio::test]
async fn test_handler_error_becomes_failure_response() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let response = harness
        .client
        .send_sync(Bytes::from_static(b"boom"), 5_000)
        .await
        .unwrap();

    assert!(!response.is_success());
    assert!(response.error().unwrap().contains("boom"));
    assert_eq!(harness.client.metrics().snapshot().requests_failed, 1);
    assert_eq!(harness.server.metrics().snapshot().handler_failures, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_handler_panic_becomes_failure_response() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(PanickingHandler)).await;

    let response = harness
        .client
        .send_sync(Bytes::from_static(b"anything"), 5_000)
        .await
        .unwrap();

    assert!(!response.is_success());
    assert!(response.error().unwrap().contains("handler panicked"));

    // The server keeps serving after a panic.
    let again = harness
        .client
        .send_sync(Bytes::from_static(b"again"), 5_000)
        .await
        .unwrap();
    assert!(!again.is_success());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_resolve_to_their_own_payloads() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let payloads: Vec<String> = (0..64).map(|i| format!("request-{i}")).collect();
    let futures = payloads
        .iter()
        .map(|p| harness.client.send_async(Bytes::from(p.clone()), 5_000));
    let responses = join_all(futures).await;

    for (payload, response) in payloads.iter().zip(responses) {
        let response = response.unwrap();
        assert_eq!(response.payload(), &Bytes::from(payload.clone()));
    }
    assert_eq!(harness.client.pending_count(), 0);
    assert_eq!(harness.client.metrics().snapshot().requests_succeeded, 64);

    harness.stop().await;
}

#[tokio::test]
async fn test_clients_receive_only_their_own_replies() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let other = harness.extra_client().await;
    assert_ne!(harness.client.reply_channel(), other.reply_channel());

    let (a, b) = tokio::join!(
        harness.client.send_sync(Bytes::from_static(b"from-a"), 5_000),
        other.send_sync(Bytes::from_static(b"from-b"), 5_000),
    );

    assert_eq!(a.unwrap().into_payload(), Bytes::from_static(b"from-a"));
    assert_eq!(b.unwrap().into_payload(), Bytes::from_static(b"from-b"));
    assert_eq!(harness.client.metrics().snapshot().requests_succeeded, 1);
    assert_eq!(other.metrics().snapshot().requests_succeeded, 1);

    other.close().await.unwrap();
    harness.stop().await;
}

#[tokio::test]
async fn test_reply_for_unknown_correlation_is_ignored() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let stray = ResponseEnvelope::success(CorrelationId::new(), Bytes::from_static(b"stray"));
    harness
        .transport
        .publish(
            harness.client.reply_channel(),
            stray.payload().clone(),
            stray.to_properties(),
        )
        .await
        .unwrap();

    // The stray reply completes nothing; the next exchange is unaffected.
    let response = harness
        .client
        .send_sync(Bytes::from_static(b"after"), 5_000)
        .await
        .unwrap();
    assert_eq!(response.into_payload(), Bytes::from_static(b"after"));
    assert_eq!(harness.client.pending_count(), 0);
    assert_eq!(harness.client.metrics().snapshot().requests_succeeded, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_two_servers_share_the_request_channel() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let second = busrpc_core::RpcServer::new(
        RpcConfig::default(),
        harness.transport.clone(),
        Arc::new(EchoHandler::new()),
    )
    .unwrap();
    second.start().await.unwrap();

    for i in 0..16 {
        let payload = Bytes::from(format!("msg-{i}"));
        let response = harness.client.send_sync(payload.clone(), 5_000).await.unwrap();
        assert_eq!(response.into_payload(), payload);
    }

    let handled = harness.server.metrics().snapshot().requests_handled
        + second.metrics().snapshot().requests_handled;
    assert_eq!(handled, 16);

    second.close().await.unwrap();
    harness.stop().await;
}
