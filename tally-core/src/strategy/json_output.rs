//! How a structured request is expressed to a given provider.
//!
//! - [`JsonSchemaStrategy`]: the schema travels in `response_format`
//!   (OpenAI, Azure).
//! - [`JsonModeStrategy`]: only JSON object mode is available, so the schema
//!   is written into the prompt (DeepSeek and unknown OpenAI-compatible
//!   services).

use crate::error::AiError;
use crate::types::{ChatCompletionRequest, Message, ResponseFormat, ResponseSchema, Role};

/// Rewrites a chat request so the provider answers with JSON for a schema.
pub trait JsonOutputStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &str;

    /// Mutate `req` so that it asks for `schema`.
    fn apply(&self, req: &mut ChatCompletionRequest, schema: &ResponseSchema)
        -> Result<(), AiError>;
}

/// Sends the schema natively through `response_format.json_schema`.
#[derive(Debug, Clone)]
pub struct JsonSchemaStrategy {
    /// Whether the provider must enforce the schema strictly
    pub strict: bool,
}

impl JsonSchemaStrategy {
    /// Non-strict schema output.
    ///
    /// Derived schemas carry `$schema`/`title` keys and defaulted fields,
    /// which strict mode refuses.
    pub fn new() -> Self {
        Self { strict: false }
    }

    pub fn with_strict(strict: bool) -> Self {
        Self { strict }
    }
}

impl Default for JsonSchemaStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonOutputStrategy for JsonSchemaStrategy {
    fn name(&self) -> &str {
        "JsonSchemaStrategy"
    }

    fn apply(
        &self,
        req: &mut ChatCompletionRequest,
        schema: &ResponseSchema,
    ) -> Result<(), AiError> {
        req.response_format = Some(ResponseFormat::JsonSchema {
            name: schema.name.clone(),
            schema: schema.schema.clone(),
            strict: self.strict,
        });
        Ok(())
    }
}

/// Falls back to JSON object mode and spells the schema out in the prompt.
#[derive(Debug, Clone, Default)]
pub struct JsonModeStrategy;

impl JsonModeStrategy {
    pub fn new() -> Self {
        Self
    }

    fn instruction(schema: &ResponseSchema) -> Result<String, AiError> {
        let pretty = serde_json::to_string_pretty(&schema.schema)?;
        Ok(format!(
            "Respond with a single JSON object named `{}` that matches this JSON schema:\n\
            ```json\n{}\n```\n\
            Return only the JSON object. Every required field must be present \
            with the declared type.",
            schema.name, pretty
        ))
    }
}

impl JsonOutputStrategy for JsonModeStrategy {
    fn name(&self) -> &str {
        "JsonModeStrategy"
    }

    fn apply(
        &self,
        req: &mut ChatCompletionRequest,
        schema: &ResponseSchema,
    ) -> Result<(), AiError> {
        req.response_format = Some(ResponseFormat::JsonObject);
        let instruction = Self::instruction(schema)?;

        // Extend the existing system prompt so the provider sees one system
        // message.
        match req.messages.iter_mut().find(|m| m.role == Role::System) {
            Some(system) => system.content.push(crate::types::ContentPart::Text {
                text: format!("\n\n{instruction}"),
            }),
            None => req.messages.insert(0, Message::system(instruction)),
        }

        Ok(())
    }
}

/// Pick the strategy for a provider id.
pub fn detect_json_strategy(provider_id: &str) -> Box<dyn JsonOutputStrategy> {
    match provider_id {
        "openai" | "azure" => Box::new(JsonSchemaStrategy::new()),
        _ => Box::new(JsonModeStrategy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "Person",
            serde_json::json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }),
        )
    }

    #[test]
    fn test_json_schema_strategy() {
        let mut req = ChatCompletionRequest::new("gpt-4o", vec![Message::user("hi")]);
        JsonSchemaStrategy::new().apply(&mut req, &schema()).unwrap();

        match req.response_format {
            Some(ResponseFormat::JsonSchema { name, schema: s, strict }) => {
                assert_eq!(name, "Person");
                assert_eq!(s, schema().schema);
                assert!(!strict);
            }
            other => panic!("expected json schema format, got {other:?}"),
        }
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_json_mode_extends_system_prompt() {
        let mut req = ChatCompletionRequest::new(
            "deepseek-chat",
            vec![Message::system("You are terse."), Message::user("hi")],
        );
        JsonModeStrategy::new().apply(&mut req, &schema()).unwrap();

        assert_eq!(req.response_format, Some(ResponseFormat::JsonObject));
        assert_eq!(req.messages.len(), 2);
        let system = req.messages[0].text();
        assert!(system.starts_with("You are terse."));
        assert!(system.contains("`Person`"));
    }

    #[test]
    fn test_json_mode_without_system_prompt() {
        let mut req = ChatCompletionRequest::new("deepseek-chat", vec![Message::user("hi")]);
        JsonModeStrategy::new().apply(&mut req, &schema()).unwrap();

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
    }

    #[test]
    fn test_detect_json_strategy() {
        assert_eq!(detect_json_strategy("openai").name(), "JsonSchemaStrategy");
        assert_eq!(detect_json_strategy("deepseek").name(), "JsonModeStrategy");
        assert_eq!(detect_json_strategy("unknown").name(), "JsonModeStrategy");
    }
}
