use async_trait::async_trait;
use futures::stream::BoxStream;

use super::types::ChatRequest;
use crate::error::LlmError;

/// Lazy, finite, non-restartable sequence of completion text chunks.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

/// One remote chat-completion endpoint. Implementations perform exactly one
/// network exchange per call; retries and failover live in
/// [`ModelInvoker`](super::ModelInvoker).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the full completion text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Opens a streamed completion. Errors before the stream is returned are
    /// connection/status failures; errors inside the stream are mid-stream
    /// failures.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, LlmError>;
}
