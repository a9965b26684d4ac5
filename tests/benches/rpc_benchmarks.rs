//! # busrpc Benchmarks
//!
//! | Area | Measured |
//! |------|----------|
//! | Correlation Registry | register + complete without a transport |
//! | In-memory transport | ordering-key partition selection |
//! | Client/server | echo round trip and a 16-chunk stream |

use busrpc_bus::{InMemoryTransport, Transport, TransportPtr};
use busrpc_core::{CorrelationRegistry, RpcClient, RpcConfig, RpcServer};
use busrpc_node::handlers::EchoHandler;
use busrpc_types::{CorrelationId, ResponseEnvelope, SessionId};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_correlation_registry(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("correlation-registry");

    group.bench_function("register_complete", |b| {
        let registry = CorrelationRegistry::new();
        b.iter(|| {
            rt.block_on(async {
                let id = CorrelationId::new();
                let waiter = registry.register(id, Duration::from_secs(30)).unwrap();
                registry.complete(ResponseEnvelope::success(id, Bytes::new()));
                black_box(waiter.await.unwrap());
            })
        })
    });

    group.finish();
}

fn bench_partition_selection(c: &mut Criterion) {
    let transport = InMemoryTransport::new();
    let keys: Vec<String> = (0..1_000).map(|_| SessionId::new().ordering_key()).collect();

    let mut group = c.benchmark_group("in-memory-transport");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("partition_for", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(transport.partition_for(key));
            }
        })
    });
    group.finish();
}

fn bench_round_trips(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (transport, server, client) = rt.block_on(async {
        let transport: TransportPtr = Arc::new(InMemoryTransport::new());
        transport.start().await.unwrap();
        let server = RpcServer::new(
            RpcConfig::default(),
            transport.clone(),
            Arc::new(EchoHandler::new()),
        )
        .unwrap();
        server.start().await.unwrap();
        let client = RpcClient::new(RpcConfig::default(), transport.clone()).unwrap();
        client.start().await.unwrap();
        (transport, server, client)
    });

    let mut group = c.benchmark_group("client-server");
    group.measurement_time(Duration::from_secs(10));

    for size in [16usize, 1_024, 64 * 1_024] {
        let payload = Bytes::from(vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("echo", size), &payload, |b, payload| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(client.send_sync(payload.clone(), 5_000).await.unwrap());
                })
            })
        });
    }

    group.bench_function("stream_16_chunks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let session_id = client.send_streaming_start().unwrap();
                for _ in 0..16 {
                    client
                        .send_streaming_message(session_id, Bytes::from_static(b"chunk"))
                        .await
                        .unwrap();
                }
                black_box(client.send_streaming_end(session_id, 5_000).await.unwrap());
            })
        })
    });

    group.finish();

    rt.block_on(async {
        client.close().await.unwrap();
        server.close().await.unwrap();
        transport.shutdown().await.unwrap();
    });
}

criterion_group!(
    benches,
    bench_correlation_registry,
    bench_partition_selection,
    bench_round_trips
);
criterion_main!(benches);
