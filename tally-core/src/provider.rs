//! Provider trait and core abstractions.

use crate::error::AiError;
use crate::types::*;
use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::sync::Arc;

/// Stream type alias for chat completion chunks
pub type ChatCompletionStream =
    dyn Stream<Item = Result<ChatCompletionChunk, AiError>> + Send + Unpin;

/// Core provider trait for completion services.
///
/// Providers only implement the raw chat completion API. Structured output,
/// validation and failure classification are handled by the
/// [`Gateway`](crate::runtime::Gateway).
#[async_trait]
pub trait Provider: Send + Sync + Debug + 'static {
    /// Get provider information
    fn info(&self) -> Arc<ProviderInfo>;

    /// Chat completion (non-streaming)
    async fn chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AiError>;

    /// Stream chat completion
    ///
    /// Returns a stream of chat completion chunks for streaming responses.
    async fn stream_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<Box<ChatCompletionStream>, AiError>;
}
