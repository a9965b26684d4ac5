//! # Streaming Sessions
//!
//! start ─→ chunk* ─→ end marker ─→ one aggregated response, plus the
//! bidirectional variant that receives incremental responses per chunk.

use super::Harness;
use busrpc_core::{RpcConfig, RpcError};
use busrpc_node::handlers::EchoHandler;
use busrpc_types::ResponseEnvelope;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_stream_is_aggregated_in_send_order() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    assert_eq!(client.active_session_count(), 1);
    for chunk in ["A", "B", "C"] {
        client
            .send_streaming_message(session_id, Bytes::from_static(chunk.as_bytes()))
            .await
            .unwrap();
    }
    assert_eq!(client.active_session(session_id).unwrap().message_count(), 3);

    let response = client.send_streaming_end(session_id, 5_000).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.into_payload(), Bytes::from_static(b"ABC"));

    // Both sides forget the session once the end response is out.
    assert_eq!(
        client.session(session_id).unwrap_err(),
        RpcError::SessionNotFound(session_id)
    );
    assert_eq!(client.active_session_count(), 0);
    assert_eq!(harness.server.open_session_count(), 0);

    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.sessions_total, 1);
    assert_eq!(snapshot.sessions_completed, 1);
    assert_eq!(snapshot.sessions_active, 0);
    assert_eq!(snapshot.stream_messages, 3);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_long_stream_keeps_fifo_order() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    let mut expected = String::new();
    for i in 0..500 {
        let chunk = format!("{i},");
        expected.push_str(&chunk);
        client
            .send_streaming_message(session_id, Bytes::from(chunk))
            .await
            .unwrap();
    }

    let response = client.send_streaming_end(session_id, 5_000).await.unwrap();
    assert_eq!(response.into_payload(), Bytes::from(expected));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_sessions_stay_separate() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let first = client.send_streaming_start().unwrap();
    let second = client.send_streaming_start().unwrap();
    assert_ne!(first, second);

    for i in 0..20 {
        client
            .send_streaming_message(first, Bytes::from(format!("a{i}")))
            .await
            .unwrap();
        client
            .send_streaming_message(second, Bytes::from(format!("b{i}")))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(
        client.send_streaming_end(first, 5_000),
        client.send_streaming_end(second, 5_000),
    );
    let expected_a: String = (0..20).map(|i| format!("a{i}")).collect();
    let expected_b: String = (0..20).map(|i| format!("b{i}")).collect();
    assert_eq!(a.unwrap().into_payload(), Bytes::from(expected_a));
    assert_eq!(b.unwrap().into_payload(), Bytes::from(expected_b));

    harness.stop().await;
}

#[tokio::test]
async fn test_empty_stream_yields_empty_aggregate() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;

    let session_id = harness.client.send_streaming_start().unwrap();
    let response = harness
        .client
        .send_streaming_end(session_id, 5_000)
        .await
        .unwrap();

    assert!(response.is_success());
    assert!(response.payload().is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_stream_delivers_incremental_responses_in_order() {
    let harness =
        Harness::start(RpcConfig::default(), Arc::new(EchoHandler::with_chunk_echo())).await;
    let client = &harness.client;

    for _ in 0..25 {
        let received: Arc<Mutex<Vec<ResponseEnvelope>>> = Arc::new(Mutex::new(Vec::new()));
        let sent: Vec<Bytes> = (0..20).map(|i| Bytes::from(format!("c{i};"))).collect();

        let session_id = client.send_streaming_start().unwrap();
        for chunk in &sent {
            let sink = received.clone();
            client
                .send_bidirectional_message(session_id, chunk.clone(), move |response| {
                    sink.lock().push(response)
                })
                .await
                .unwrap();
        }

        // Every echo is delivered before the end response completes.
        let response = client.send_streaming_end(session_id, 5_000).await.unwrap();
        assert_eq!(response.into_payload(), Bytes::from(sent.concat()));

        let received = received.lock();
        let echoed: Vec<Bytes> = received
            .iter()
            .map(|r| {
                assert_eq!(r.session_id(), Some(session_id));
                assert!(r.correlation_id().is_none());
                r.payload().clone()
            })
            .collect();
        assert_eq!(echoed, sent);
    }
    assert_eq!(client.metrics().snapshot().sessions_active, 0);
    assert_eq!(client.metrics().snapshot().sessions_completed, 25);

    harness.stop().await;
}

#[tokio::test]
async fn test_message_to_unknown_session_is_rejected() {
    let harness = Harness::start(RpcConfig::default(), Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    client.send_streaming_end(session_id, 5_000).await.unwrap();

    let err = client
        .send_streaming_message(session_id, Bytes::from_static(b"late"))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::SessionNotFound(session_id));

    let err = client.send_streaming_end(session_id, 5_000).await.unwrap_err();
    assert_eq!(err, RpcError::SessionNotFound(session_id));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_evicted_on_both_sides() {
    let config = RpcConfig {
        session_sweep_interval_ms: 100,
        session_idle_timeout_ms: 500,
        ..RpcConfig::default()
    };
    let harness = Harness::start(config, Arc::new(EchoHandler::new())).await;
    let client = &harness.client;

    let session_id = client.send_streaming_start().unwrap();
    client
        .send_streaming_message(session_id, Bytes::from_static(b"orphan"))
        .await
        .unwrap();
    tokio::task::yield_now().await;

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        client.session(session_id).unwrap_err(),
        RpcError::SessionNotFound(session_id)
    );
    assert_eq!(harness.server.open_session_count(), 0);
    assert_eq!(client.metrics().snapshot().sessions_active, 0);

    let err = client
        .send_streaming_message(session_id, Bytes::from_static(b"again"))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::SessionNotFound(session_id));

    harness.stop().await;
}
