//! Logging layer for provider calls.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tally_core::error::AiError;
use tally_core::layer::{Layer, LayeredProvider};
use tally_core::provider::{ChatCompletionStream, Provider};
use tally_core::types::*;

/// Logs each provider call, its size and how long it took.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    target: String,
}

impl LoggingLayer {
    pub fn new() -> Self {
        Self {
            target: "provider".to_string(),
        }
    }

    /// Label used in every log line emitted by this layer
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provider> Layer<P> for LoggingLayer {
    type LayeredProvider = LoggingProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        LoggingProvider {
            inner,
            target: self.target.clone(),
        }
    }
}

/// Provider wrapped with logging
#[derive(Debug)]
pub struct LoggingProvider<P> {
    inner: P,
    target: String,
}

fn describe(req: &ChatCompletionRequest) -> String {
    let format = match &req.response_format {
        Some(ResponseFormat::JsonSchema { name, .. }) => format!("schema:{name}"),
        Some(ResponseFormat::JsonObject) => "json".to_string(),
        Some(ResponseFormat::Text) | None => "text".to_string(),
    };
    format!(
        "model={} messages={} format={}",
        req.model,
        req.messages.len(),
        format
    )
}

#[async_trait]
impl<P: Provider> LayeredProvider for LoggingProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AiError> {
        tracing::debug!("[{}] chat_completion {}", self.target, describe(&req));

        let start = Instant::now();
        let result = self.inner.chat_completion(req).await;

        match &result {
            Ok(response) => tracing::debug!(
                "[{}] chat_completion ok: id={} tokens={} elapsed={:?}",
                self.target,
                response.id,
                response.usage.total_tokens,
                start.elapsed()
            ),
            Err(e) => tracing::warn!(
                "[{}] chat_completion failed after {:?}: {}",
                self.target,
                start.elapsed(),
                e
            ),
        }

        result
    }

    async fn layered_stream_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<Box<ChatCompletionStream>, AiError> {
        tracing::debug!("[{}] stream_chat_completion {}", self.target, describe(&req));

        let start = Instant::now();
        let result = self.inner.stream_chat_completion(req).await;

        match &result {
            Ok(_) => tracing::debug!(
                "[{}] stream opened after {:?}",
                self.target,
                start.elapsed()
            ),
            Err(e) => tracing::warn!(
                "[{}] stream_chat_completion failed after {:?}: {}",
                self.target,
                start.elapsed(),
                e
            ),
        }

        result
    }
}

#[async_trait]
impl<P: Provider> Provider for LoggingProvider<P> {
    fn info(&self) -> Arc<ProviderInfo> {
        LayeredProvider::layered_info(self)
    }

    async fn chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AiError> {
        LayeredProvider::layered_chat_completion(self, req).await
    }

    async fn stream_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<Box<ChatCompletionStream>, AiError> {
        LayeredProvider::layered_stream_chat_completion(self, req).await
    }
}
