//! # busrpc Node
//!
//! Wiring for the demo executable.
//!
//! ## Startup Sequence
//!
//! 1. Load `RpcConfig` and `TelemetryConfig` from the environment
//! 2. Initialize logging
//! 3. Start the transport selected by `broker_address`
//! 4. Start the echo server, then the client
//! 5. Run one request and one streaming exchange
//! 6. Close client, server and transport

pub mod handlers;

use anyhow::{bail, Context, Result};
use busrpc_bus::{InMemoryTransport, Transport, TransportPtr};
use busrpc_core::{RpcClient, RpcConfig, RpcServer};
use bytes::Bytes;
use handlers::EchoHandler;
use std::sync::Arc;
use tracing::info;

/// Transport for `broker_address`. Only `memory://` is built in.
pub fn transport_for(config: &RpcConfig) -> Result<TransportPtr> {
    if config.broker_address.starts_with("memory://") {
        Ok(Arc::new(InMemoryTransport::new()))
    } else {
        bail!("unsupported broker address: {}", config.broker_address)
    }
}

/// A server and a client sharing one transport.
pub struct DemoNode {
    transport: TransportPtr,
    server: RpcServer,
    client: RpcClient,
}

/// What the demo exchange produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub echo: Bytes,
    pub stream: Bytes,
}

impl DemoNode {
    pub fn new(config: RpcConfig) -> Result<Self> {
        let transport = transport_for(&config)?;
        let server = RpcServer::new(config.clone(), transport.clone(), Arc::new(EchoHandler::new()))
            .context("building server")?;
        let client = RpcClient::new(config, transport.clone()).context("building client")?;
        Ok(Self {
            transport,
            server,
            client,
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.transport.start().await.context("starting transport")?;
        self.server.start().await.context("starting server")?;
        self.client.start().await.context("starting client")?;
        info!(sender_id = %self.client.sender_id(), "Node started");
        Ok(())
    }

    /// One synchronous call and one three-chunk stream.
    pub async fn run_demo(&self) -> Result<DemoReport> {
        let timeout_ms = self.client.config().default_timeout_ms;

        let response = self
            .client
            .send_sync(Bytes::from_static(b"ping"), timeout_ms)
            .await
            .context("echo request")?;
        if !response.is_success() {
            bail!("echo request failed: {}", response.error().unwrap_or_default());
        }
        info!(payload = ?response.payload(), "Echo response received");

        let session_id = self.client.send_streaming_start()?;
        for chunk in ["A", "B", "C"] {
            self.client
                .send_streaming_message(session_id, Bytes::from_static(chunk.as_bytes()))
                .await?;
        }
        let streamed = self
            .client
            .send_streaming_end(session_id, timeout_ms)
            .await
            .context("streaming exchange")?;
        info!(payload = ?streamed.payload(), "Stream response received");

        Ok(DemoReport {
            echo: response.into_payload(),
            stream: streamed.into_payload(),
        })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn server(&self) -> &RpcServer {
        &self.server
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.client.close().await.context("closing client")?;
        self.server.close().await.context("closing server")?;
        self.transport.shutdown().await.context("closing transport")?;
        info!("Node stopped");
        Ok(())
    }
}
