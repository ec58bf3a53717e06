//! OpenAI provider implementation using the async-openai crate.
//!
//! Implements the raw chat completion calls and maps every async-openai error
//! onto an [`AiError`] variant precise enough for the gateway to classify it
//! (invalid request, rate limit, network, ...).

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, CreateChatCompletionStreamResponse,
    FinishReason as OpenAIFinishReason, ReasoningEffort as OpenAIReasoningEffort,
    ResponseFormat as OpenAIResponseFormat,
    ResponseFormatJsonSchema as OpenAIResponseFormatJsonSchema, Role as OpenAIRole,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::sync::Arc;
use tally_core::error::AiError;
use tally_core::provider::{ChatCompletionStream, Provider};
use tally_core::types::*;

/// OpenAI provider using async-openai
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    info: Arc<ProviderInfo>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("info", &self.info)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with default configuration
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            info: Arc::new(ProviderInfo {
                id: "openai".to_string(),
                name: "OpenAI".to_string(),
            }),
        }
    }

    /// Create a builder for more configuration options
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::default()
    }

    fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage, AiError> {
        let content = msg.text();
        let built = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()
                .map(ChatCompletionRequestMessage::System),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map(ChatCompletionRequestMessage::User),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()
                .map(ChatCompletionRequestMessage::Assistant),
        };
        built.map_err(|e| AiError::invalid_request(format!("Failed to build message: {e}")))
    }

    fn convert_response_format(format: &ResponseFormat) -> OpenAIResponseFormat {
        match format {
            ResponseFormat::Text => OpenAIResponseFormat::Text,
            ResponseFormat::JsonObject => OpenAIResponseFormat::JsonObject,
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => OpenAIResponseFormat::JsonSchema {
                json_schema: OpenAIResponseFormatJsonSchema {
                    name: name.clone(),
                    schema: Some(schema.clone()),
                    strict: Some(*strict),
                    description: None,
                },
            },
        }
    }

    fn convert_reasoning_effort(effort: ReasoningEffort) -> OpenAIReasoningEffort {
        match effort {
            ReasoningEffort::Low => OpenAIReasoningEffort::Low,
            ReasoningEffort::Medium => OpenAIReasoningEffort::Medium,
            ReasoningEffort::High => OpenAIReasoningEffort::High,
        }
    }

    fn build_request(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<CreateChatCompletionRequest, AiError> {
        let messages = req
            .messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&req.model).messages(messages);

        if let Some(max_tokens) = req.max_tokens {
            builder.max_completion_tokens(max_tokens);
        }
        if let Some(response_format) = &req.response_format {
            builder.response_format(Self::convert_response_format(response_format));
        }
        if let Some(effort) = req.reasoning_effort {
            builder.reasoning_effort(Self::convert_reasoning_effort(effort));
        }
        if let Some(stream) = req.stream {
            builder.stream(stream);
        }

        builder
            .build()
            .map_err(|e| AiError::invalid_request(format!("Failed to build request: {e}")))
    }

    fn convert_role(role: &OpenAIRole) -> Role {
        match role {
            OpenAIRole::System => Role::System,
            OpenAIRole::User => Role::User,
            _ => Role::Assistant,
        }
    }

    fn convert_finish_reason(reason: OpenAIFinishReason) -> FinishReason {
        match reason {
            OpenAIFinishReason::Stop => FinishReason::Stop,
            OpenAIFinishReason::Length => FinishReason::Length,
            OpenAIFinishReason::ToolCalls => FinishReason::ToolCalls,
            OpenAIFinishReason::ContentFilter => FinishReason::ContentFilter,
            other => FinishReason::Other(format!("{other:?}")),
        }
    }

    fn convert_response(response: CreateChatCompletionResponse) -> ChatCompletionResponse {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: Self::convert_role(&choice.message.role),
                    content: vec![ContentPart::Text {
                        text: choice.message.content.unwrap_or_default(),
                    }],
                    name: None,
                },
                finish_reason: choice
                    .finish_reason
                    .map_or(FinishReason::Stop, Self::convert_finish_reason),
            })
            .collect();

        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        ChatCompletionResponse {
            id: response.id,
            model: response.model,
            choices,
            usage,
            created: Some(response.created as u64),
        }
    }

    fn convert_stream_chunk(response: CreateChatCompletionStreamResponse) -> ChatCompletionChunk {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| ChoiceDelta {
                index: choice.index,
                delta: MessageDelta {
                    role: choice.delta.role.as_ref().map(Self::convert_role),
                    content: choice.delta.content,
                },
                finish_reason: choice.finish_reason.map(Self::convert_finish_reason),
            })
            .collect();

        ChatCompletionChunk {
            id: response.id,
            model: response.model,
            choices,
            usage: None,
        }
    }
}

/// Classify an API error body by its `type` and message.
fn classify_api_error(error_type: Option<&str>, message: &str) -> AiError {
    let lowered = message.to_lowercase();
    match error_type {
        Some("requests") | Some("tokens") | Some("insufficient_quota") => {
            AiError::rate_limit(message)
        }
        _ if lowered.contains("rate limit") => AiError::rate_limit(message),
        Some("invalid_request_error") => AiError::invalid_request(message),
        Some("authentication_error") => AiError::authentication(message),
        _ if lowered.contains("api key") => AiError::authentication(message),
        _ if lowered.contains("model") && lowered.contains("does not exist") => {
            AiError::model_not_found(message)
        }
        _ => AiError::provider(message),
    }
}

/// Map an async-openai error onto an [`AiError`].
fn map_openai_error(err: OpenAIError) -> AiError {
    match err {
        OpenAIError::ApiError(api) => classify_api_error(api.r#type.as_deref(), &api.message),
        OpenAIError::Reqwest(e) if e.is_timeout() => AiError::timeout(e.to_string()),
        OpenAIError::Reqwest(e) => AiError::Network(e),
        OpenAIError::JSONDeserialize(e, _) => AiError::Serialization(e),
        OpenAIError::InvalidArgument(msg) => AiError::invalid_request(msg),
        other => AiError::stream(other.to_string()),
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        self.info.clone()
    }

    async fn chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AiError> {
        let mut openai_req = self.build_request(&req)?;
        openai_req.stream = None;

        let response = self
            .client
            .chat()
            .create(openai_req)
            .await
            .map_err(map_openai_error)?;

        Ok(Self::convert_response(response))
    }

    async fn stream_chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<Box<ChatCompletionStream>, AiError> {
        let mut openai_req = self.build_request(&req)?;
        openai_req.stream = Some(true);

        let stream = self
            .client
            .chat()
            .create_stream(openai_req)
            .await
            .map_err(map_openai_error)?;

        let chunks = stream.map(|result| {
            result
                .map(Self::convert_stream_chunk)
                .map_err(map_openai_error)
        });

        Ok(Box::new(chunks))
    }
}

/// Builder for OpenAI provider with custom configuration
#[derive(Default)]
pub struct OpenAiBuilder {
    api_key: Option<String>,
    api_base: Option<String>,
}

impl OpenAiBuilder {
    /// Set API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set API base URL (for OpenAI-compatible APIs like DeepSeek)
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Build the provider
    pub fn build(self) -> Result<OpenAiProvider, AiError> {
        self.build_with_id("openai", "OpenAI")
    }

    /// Build a provider with a custom provider ID and name
    ///
    /// The id decides the JSON output strategy the gateway uses.
    pub fn build_with_id(
        self,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Result<OpenAiProvider, AiError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AiError::configuration("API key is required"))?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(api_base) = self.api_base {
            config = config.with_api_base(api_base);
        }

        Ok(OpenAiProvider {
            client: Client::with_config(config),
            info: Arc::new(ProviderInfo {
                id: provider_id.into(),
                name: provider_name.into(),
            }),
        })
    }
}
