//! Inbound port: application request-handling logic.

use async_trait::async_trait;
use busrpc_types::SessionId;
use bytes::Bytes;

/// Application logic invoked by the server dispatcher.
///
/// Errors and panics are both turned into failure responses, so the caller
/// always gets an answer.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Process one single request.
    async fn process_request(&self, payload: Bytes) -> anyhow::Result<Bytes>;

    /// Process a complete streamed sequence, in send order.
    async fn process_stream(&self, payloads: Vec<Bytes>) -> anyhow::Result<Bytes>;

    /// Observe one mid-stream chunk.
    ///
    /// Returning `Some` publishes an incremental response to the session's
    /// owner. Defaults to no incremental output.
    async fn process_stream_message(
        &self,
        _session_id: SessionId,
        _payload: &Bytes,
    ) -> anyhow::Result<Option<Bytes>> {
        Ok(None)
    }
}
