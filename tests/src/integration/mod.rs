//! Client/server scenarios over `InMemoryTransport`.

mod lifecycle;
mod round_trip;
mod streaming;

use busrpc_bus::{InMemoryTransport, Transport, TransportPtr};
use busrpc_core::{RequestHandler, RpcClient, RpcConfig, RpcServer};
use std::sync::Arc;

/// A started transport, server and client sharing one config.
pub struct Harness {
    pub transport: TransportPtr,
    pub server: RpcServer,
    pub client: RpcClient,
}

impl Harness {
    pub async fn start(config: RpcConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let transport: TransportPtr = Arc::new(InMemoryTransport::new());
        transport.start().await.unwrap();

        let server = RpcServer::new(config.clone(), transport.clone(), handler).unwrap();
        server.start().await.unwrap();
        let client = RpcClient::new(config, transport.clone()).unwrap();
        client.start().await.unwrap();

        Self {
            transport,
            server,
            client,
        }
    }

    /// Another client on the same transport.
    pub async fn extra_client(&self) -> RpcClient {
        let client = RpcClient::new(self.client.config().clone(), self.transport.clone()).unwrap();
        client.start().await.unwrap();
        client
    }

    pub async fn stop(self) {
        self.client.close().await.unwrap();
        self.server.close().await.unwrap();
        self.transport.shutdown().await.unwrap();
    }
}
