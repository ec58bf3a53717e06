//! Transport retries with exponential backoff.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_core::error::AiError;
use tally_core::layer::{Layer, LayeredProvider};
use tally_core::provider::{ChatCompletionStream, Provider};
use tally_core::types::*;

/// Retries network errors, timeouts and rate limits.
///
/// Only errors for which [`AiError::is_retryable`] holds are retried; invalid
/// requests fail immediately.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryLayer {
    /// Two retries, 200ms initial delay doubling up to 10s.
    pub fn new() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (zero based)
    fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provider> Layer<P> for RetryLayer {
    type LayeredProvider = RetryProvider<P>;

    fn layer(&self, inner: P) -> Self::LayeredProvider {
        RetryProvider {
            inner,
            config: self.clone(),
        }
    }
}

/// Provider wrapped with retry logic
#[derive(Debug)]
pub struct RetryProvider<P> {
    inner: P,
    config: RetryLayer,
}

impl<P: Provider> RetryProvider<P> {
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut retry = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.config.max_retries => {
                    let delay = self.config.delay_for(retry);
                    retry += 1;
                    tracing::debug!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation,
                        e,
                        retry,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<P: Provider> LayeredProvider for RetryProvider<P> {
    type Inner = P;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AiError> {
        self.with_retry("chat_completion", || {
            let req = req.clone();
            async move { self.inner.chat_completion(req).await }
        })
        .await
    }

    async fn layered_stream_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<Box<ChatCompletionStream>, AiError> {
        // Only opening the stream is retried; a stream that fails mid-way
        // surfaces its error to the consumer.
        self.with_retry("stream_chat_completion", || {
            let req = req.clone();
            async move { self.inner.stream_chat_completion(req).await }
        })
        .await
    }
}

#[async_trait]
impl<P: Provider> Provider for RetryProvider<P> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers `{"value": 4}`.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
        retryable: bool,
    }

    impl Flaky {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures,
                calls: Arc::new(AtomicU32::new(0)),
                retryable,
            }
        }
    }

    #[async_trait]
    impl Provider for Flaky {
        fn info(&self) -> Arc<ProviderInfo> {
            Arc::new(ProviderInfo {
                id: "flaky".to_string(),
                name: "Flaky".to_string(),
            })
        }

        async fn chat_completion(
            &self,
            _req: ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, AiError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    AiError::rate_limit("429")
                } else {
                    AiError::invalid_request("400")
                });
            }
            Ok(ChatCompletionResponse {
                id: format!("resp-{call}"),
                model: "m".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(r#"{"value": 4}"#),
                    finish_reason: FinishReason::Stop,
                }],
                usage: Usage::default(),
                created: None,
            })
        }

        async fn stream_chat_completion(
            &self,
            _req: ChatCompletionRequest,
        ) -> Result<Box<ChatCompletionStream>, AiError> {
            Err(AiError::unsupported("no streams here"))
        }
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::new("m", vec![Message::user("hi")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors() {
        let provider = RetryLayer::new()
            .with_max_retries(3)
            .layer(Flaky::new(2, true));

        let response = provider.chat_completion(request()).await.unwrap();
        assert_eq!(response.id, "resp-2");
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let provider = RetryLayer::new()
            .with_max_retries(1)
            .layer(Flaky::new(5, true));

        let err = provider.chat_completion(request()).await.unwrap_err();
        assert!(matches!(err, AiError::RateLimit(_)));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_retry_invalid_requests() {
        let provider = RetryLayer::new().layer(Flaky::new(1, false));

        let err = provider.chat_completion(request()).await.unwrap_err();
        assert!(matches!(err, AiError::InvalidRequest(_)));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retry_does_not_spend_candidates() {
        let flaky = Flaky::new(1, true);
        let calls = flaky.calls.clone();
        let gateway = tally_core::Gateway::builder(flaky)
            .layer(RetryLayer::new().with_max_retries(2))
            .finish();

        let request = tally_core::CompletionRequest::new("m", "sys", "pick a number")
            .with_schema(ResponseSchema::new(
                "Guess",
                serde_json::json!({"type": "object"}),
            ))
            .with_max_retries(0);

        let value = gateway
            .complete(request)
            .await
            .unwrap()
            .into_structured()
            .unwrap();
        assert_eq!(value, serde_json::json!({"value": 4}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_is_capped() {
        let layer = RetryLayer::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(layer.delay_for(0), Duration::from_millis(100));
        assert_eq!(layer.delay_for(1), Duration::from_millis(200));
        assert_eq!(layer.delay_for(2), Duration::from_millis(350));
        assert_eq!(layer.delay_for(40), Duration::from_millis(350));
    }
}
