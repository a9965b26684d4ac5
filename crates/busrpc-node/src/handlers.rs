//! Demo request handlers.

use async_trait::async_trait;
use busrpc_core::RequestHandler;
use busrpc_types::SessionId;
use bytes::Bytes;
use tracing::debug;

/// Echoes single requests and concatenates streams.
///
/// The payload `boom` fails, which exercises the failure-response path.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler {
    /// Echo each streamed chunk back as an incremental response.
    pub echo_chunks: bool,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_echo() -> Self {
        Self { echo_chunks: true }
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn process_request(&self, payload: Bytes) -> anyhow::Result<Bytes> {
        if payload.as_ref() == b"boom" {
            anyhow::bail!("boom: requested failure");
        }
        Ok(payload)
    }

    async fn process_stream(&self, payloads: Vec<Bytes>) -> anyhow::Result<Bytes> {
        debug!(chunks = payloads.len(), "Concatenating stream");
        Ok(Bytes::from(payloads.concat()))
    }

    async fn process_stream_message(
        &self,
        _session_id: SessionId,
        payload: &Bytes,
    ) -> anyhow::Result<Option<Bytes>> {
        Ok(self.echo_chunks.then(|| payload.clone()))
    }
}
