//! # Tally Providers
//!
//! Provider implementations for completion services.

pub mod openai;

// Re-exports
pub use openai::{OpenAiBuilder, OpenAiProvider};

use tally_core::error::AiError;

/// OpenAI-compatible endpoint of DeepSeek.
pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1";

/// Create a DeepSeek provider (OpenAI-compatible)
///
/// DeepSeek speaks the OpenAI protocol on its own endpoint and only supports
/// JSON object mode, which the gateway picks from the `deepseek` provider id.
pub fn deepseek(api_key: impl Into<String>) -> Result<OpenAiProvider, AiError> {
    OpenAiProvider::builder()
        .api_key(api_key)
        .api_base(DEEPSEEK_API_BASE)
        .build_with_id("deepseek", "DeepSeek")
}
