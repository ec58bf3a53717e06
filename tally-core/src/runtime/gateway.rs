//! Gateway implementation.
//!
//! The gateway is the only entry point callers use to reach a completion
//! service. It never returns anything but a [`CompletionOutcome`]: transport
//! errors are classified, structured candidates are validated and retried,
//! and streaming text is wrapped in a [`TokenStream`].

use crate::error::{AiError, FailureKind, GatewayFailure};
use crate::layer::Layer;
use crate::provider::Provider;
use crate::strategy::{detect_json_strategy, JsonOutputStrategy};
use crate::stream::TokenStream;
use crate::types::*;
use crate::validate::{reask_message, AcceptAll, Validator};
use std::sync::Arc;
use tracing::Instrument;

/// Type-erased provider that can be shared across threads
type BoxedProvider = Arc<dyn Provider>;

/// Successful result of a completion.
#[derive(Debug)]
pub enum Completion<T> {
    /// Accepted structured candidate
    Structured(T),
    /// Buffered free text
    Text(String),
    /// Incremental free text
    Stream(TokenStream),
}

impl<T> Completion<T> {
    pub fn into_structured(self) -> Option<T> {
        match self {
            Completion::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Completion::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Everything a gateway call can produce.
pub type CompletionOutcome<T> = Result<Completion<T>, GatewayFailure>;

/// Builder composing a provider with layers.
///
/// ```ignore
/// let gateway = Gateway::builder(openai_provider)
///     .layer(RetryLayer::new().with_max_retries(2))
///     .layer(LoggingLayer::new())
///     .finish();
/// ```
pub struct GatewayBuilder<P> {
    provider: P,
    json_strategy: Option<Box<dyn JsonOutputStrategy>>,
}

impl<P: Provider> GatewayBuilder<P> {
    /// Create a new builder with a provider
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            json_strategy: None,
        }
    }

    /// Add a layer to wrap the provider
    ///
    /// Each call wraps the previous provider, so the last layer added is the
    /// outermost.
    pub fn layer<L>(self, layer: L) -> GatewayBuilder<L::LayeredProvider>
    where
        L: Layer<P>,
    {
        GatewayBuilder {
            provider: layer.layer(self.provider),
            json_strategy: self.json_strategy,
        }
    }

    /// Set a custom JSON output strategy
    ///
    /// If not set, the strategy is detected from the provider id.
    pub fn json_strategy(mut self, strategy: Box<dyn JsonOutputStrategy>) -> Self {
        self.json_strategy = Some(strategy);
        self
    }

    /// Finish building and create a Gateway
    pub fn finish(self) -> Gateway {
        let provider = Arc::new(self.provider);
        let provider_id = provider.info().id.clone();

        let json_strategy = self
            .json_strategy
            .unwrap_or_else(|| detect_json_strategy(&provider_id));

        Gateway {
            provider,
            json_strategy,
        }
    }
}

/// Uniform entry point into the completion service.
pub struct Gateway {
    provider: BoxedProvider,
    json_strategy: Box<dyn JsonOutputStrategy>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("provider", &self.provider)
            .field("json_strategy", &self.json_strategy.name())
            .finish()
    }
}

impl Gateway {
    /// Create a new builder
    pub fn builder<P: Provider>(provider: P) -> GatewayBuilder<P> {
        GatewayBuilder::new(provider)
    }

    /// Get provider information
    pub fn info(&self) -> Arc<ProviderInfo> {
        self.provider.info()
    }

    /// Complete a request without semantic validation.
    ///
    /// Structured requests yield the raw JSON value; only responses that are
    /// not JSON at all are rejected and retried.
    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> CompletionOutcome<serde_json::Value> {
        self.complete_validated(request, &AcceptAll::<serde_json::Value>::new())
            .await
    }

    /// Complete a request, running structured candidates through `validator`.
    ///
    /// For structured requests at most `max_retries + 1` candidates are
    /// generated. Text requests ignore the validator.
    pub async fn complete_validated<V: Validator>(
        &self,
        request: CompletionRequest,
        validator: &V,
    ) -> CompletionOutcome<V::Output> {
        let ctx = RequestContext::new(self.provider.info().id.clone(), request.model());
        let span = tracing::debug_span!(
            "completion",
            request_id = %ctx.request_id,
            provider = %ctx.provider_id,
            model = %ctx.model,
        );

        async move {
            match (request.response_schema(), request.stream()) {
                (Some(schema), true) => Err(GatewayFailure::new(
                    FailureKind::MalformedRequest,
                    format!(
                        "streaming structured output for schema `{}` is not supported",
                        schema.name
                    ),
                )),
                (Some(schema), false) => self
                    .structured(&request, schema, validator)
                    .await
                    .map(Completion::Structured),
                (None, true) => self.stream_text(&request).await.map(Completion::Stream),
                (None, false) => self.text(&request).await.map(Completion::Text),
            }
        }
        .instrument(span)
        .await
    }

    async fn text(&self, request: &CompletionRequest) -> Result<String, GatewayFailure> {
        let response = self
            .provider
            .chat_completion(request.to_chat_request())
            .await
            .map_err(|e| fail(&e))?;

        response
            .first_text()
            .ok_or_else(|| fail(&AiError::provider("No choices in response")))
    }

    async fn stream_text(
        &self,
        request: &CompletionRequest,
    ) -> Result<TokenStream, GatewayFailure> {
        let stream = self
            .provider
            .stream_chat_completion(request.to_chat_request())
            .await
            .map_err(|e| fail(&e))?;

        Ok(TokenStream::new(stream))
    }

    async fn structured<V: Validator>(
        &self,
        request: &CompletionRequest,
        schema: &ResponseSchema,
        validator: &V,
    ) -> Result<V::Output, GatewayFailure> {
        let mut chat_req = request.to_chat_request();
        self.json_strategy
            .apply(&mut chat_req, schema)
            .map_err(|e| fail(&e))?;

        let attempts = request.max_retries().saturating_add(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            tracing::debug!(
                "requesting `{}` candidate {}/{} via {}",
                schema.name,
                attempt,
                attempts,
                self.json_strategy.name()
            );

            let response = self
                .provider
                .chat_completion(chat_req.clone())
                .await
                .map_err(|e| fail(&e))?;
            let raw = response
                .first_text()
                .ok_or_else(|| fail(&AiError::provider("No choices in response")))?;

            let reason = match serde_json::from_str::<V::Candidate>(&raw) {
                Ok(candidate) => match validator.validate(candidate).await {
                    Ok(output) => {
                        tracing::debug!("`{}` candidate {} accepted", schema.name, attempt);
                        return Ok(output);
                    }
                    Err(rejection) => {
                        if let Some(candidate) = &rejection.candidate {
                            tracing::debug!("rejected candidate: {}", candidate);
                        }
                        rejection.reason
                    }
                },
                Err(err) => format!(
                    "The response is not a valid `{}` object: {}",
                    schema.name, err
                ),
            };

            tracing::warn!(
                "`{}` candidate {}/{} rejected: {}",
                schema.name,
                attempt,
                attempts,
                reason
            );

            chat_req.messages.push(Message::assistant(raw));
            chat_req.messages.push(Message::user(reask_message(&reason)));
            last_reason = reason;
        }

        Err(GatewayFailure::new(
            FailureKind::ValidationExhausted,
            format!(
                "all {} `{}` candidates were rejected, last reason: {}",
                attempts, schema.name, last_reason
            ),
        ))
    }
}

fn fail(err: &AiError) -> GatewayFailure {
    let failure = GatewayFailure::from(err);
    tracing::error!("completion failed ({}): {:?}", failure.kind, err);
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatCompletionStream;
    use crate::validate::Rejection;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider answering from a queue of canned results.
    #[derive(Debug, Default)]
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, AiError>>>,
        requests: Mutex<Vec<ChatCompletionRequest>>,
        stream_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, AiError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn response(text: String) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "resp".to_string(),
            model: "test-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: FinishReason::Stop,
            }],
            usage: Usage::default(),
            created: None,
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn info(&self) -> Arc<ProviderInfo> {
            Arc::new(ProviderInfo {
                id: "openai".to_string(),
                name: "Scripted".to_string(),
            })
        }

        async fn chat_completion(
            &self,
            req: ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, AiError> {
            self.requests.lock().unwrap().push(req);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AiError::other("script exhausted")));
            reply.map(response)
        }

        async fn stream_chat_completion(
            &self,
            _req: ChatCompletionRequest,
        ) -> Result<Box<ChatCompletionStream>, AiError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let chunks = ["The ", "", "answer"]
                .into_iter()
                .map(|delta| {
                    Ok::<_, AiError>(ChatCompletionChunk {
                        id: "chunk".to_string(),
                        model: "test-model".to_string(),
                        choices: vec![ChoiceDelta {
                            index: 0,
                            delta: MessageDelta {
                                role: None,
                                content: (!delta.is_empty()).then(|| delta.to_string()),
                            },
                            finish_reason: None,
                        }],
                        usage: None,
                    })
                })
                .collect::<Vec<_>>();
            Ok(Box::new(futures::stream::iter(chunks)))
        }
    }

    #[derive(Debug, serde::Deserialize)]
    struct Guess {
        value: i64,
    }

    /// Accepts only even guesses.
    struct EvenValidator;

    #[async_trait]
    impl Validator for EvenValidator {
        type Candidate = Guess;
        type Output = i64;

        async fn validate(&self, candidate: Guess) -> Result<i64, Rejection> {
            if candidate.value % 2 == 0 {
                Ok(candidate.value)
            } else {
                Err(Rejection::new(format!("{} is odd", candidate.value)))
            }
        }
    }

    fn structured_request(max_retries: u32) -> CompletionRequest {
        CompletionRequest::new("gpt-4o", "guess", "pick a number")
            .with_schema(ResponseSchema::new(
                "Guess",
                serde_json::json!({"type": "object"}),
            ))
            .with_max_retries(max_retries)
    }

    fn gateway(provider: ScriptedProvider) -> (Gateway, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let gateway = Gateway {
            provider: provider.clone(),
            json_strategy: detect_json_strategy("openai"),
        };
        (gateway, provider)
    }

    #[tokio::test]
    async fn test_text_completion() {
        let (gateway, _) = gateway(ScriptedProvider::new(vec![Ok("hello".to_string())]));
        let outcome = gateway
            .complete(CompletionRequest::new("gpt-4o", "sys", "hi"))
            .await
            .unwrap();
        assert_eq!(outcome.into_text().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_attempts_r_plus_one_candidates() {
        let replies = (0..10).map(|i| Ok(format!("{{\"value\": {}}}", 2 * i + 1))).collect();
        let (gateway, provider) = gateway(ScriptedProvider::new(replies));

        let failure = gateway
            .complete_validated(structured_request(3), &EvenValidator)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::ValidationExhausted);
        assert!(failure.is_rejection());
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_stops_at_first_accepted_candidate() {
        let replies = vec![
            Ok("{\"value\": 1}".to_string()),
            Ok("not json".to_string()),
            Ok("{\"value\": 4}".to_string()),
            Ok("{\"value\": 6}".to_string()),
        ];
        let (gateway, provider) = gateway(ScriptedProvider::new(replies));

        let value = gateway
            .complete_validated(structured_request(5), &EvenValidator)
            .await
            .unwrap()
            .into_structured();

        assert_eq!(value, Some(4));
        assert_eq!(provider.calls(), 3);

        // The last request carries both rejections back to the model.
        let requests = provider.requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert_eq!(last.messages.len(), 6);
        assert!(last.messages[3].text().contains("1 is odd"));
        assert!(last.messages[5].text().contains("not a valid `Guess`"));
    }

    #[tokio::test]
    async fn test_zero_budget_means_single_attempt() {
        let replies = vec![Ok("{\"value\": 3}".to_string()), Ok("{\"value\": 2}".to_string())];
        let (gateway, provider) = gateway(ScriptedProvider::new(replies));

        let failure = gateway
            .complete_validated(structured_request(0), &EvenValidator)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::ValidationExhausted);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_validation_loop() {
        let replies = vec![
            Ok("{\"value\": 1}".to_string()),
            Err(AiError::rate_limit("429")),
            Ok("{\"value\": 2}".to_string()),
        ];
        let (gateway, provider) = gateway(ScriptedProvider::new(replies));

        let failure = gateway
            .complete_validated(structured_request(3), &EvenValidator)
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Throttled);
        assert!(!failure.is_rejection());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_streaming_structured_output_is_refused() {
        let (gateway, provider) = gateway(ScriptedProvider::new(vec![]));

        let failure = gateway
            .complete(structured_request(1).with_stream(true))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::MalformedRequest);
        assert_eq!(provider.calls(), 0);
        assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_streaming_text() {
        let (gateway, provider) = gateway(ScriptedProvider::new(vec![]));

        let completion = gateway
            .complete(CompletionRequest::new("gpt-4o", "sys", "hi").with_stream(true))
            .await
            .unwrap();

        let Completion::Stream(stream) = completion else {
            panic!("expected a token stream");
        };
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["The ", "", "answer"]);
        assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let (gateway, _) = gateway(ScriptedProvider::new(vec![
            Err(AiError::invalid_request("bad schema")),
            Err(AiError::timeout("slow")),
        ]));

        let first = gateway
            .complete(CompletionRequest::new("gpt-4o", "sys", "hi"))
            .await
            .unwrap_err();
        assert_eq!(first.kind, FailureKind::MalformedRequest);

        let second = gateway
            .complete(CompletionRequest::new("gpt-4o", "sys", "hi"))
            .await
            .unwrap_err();
        assert_eq!(second.kind, FailureKind::Unknown);
        assert_ne!(second.message, second.detail);
    }
}
