//! # Tally Core
//!
//! Completion gateway for Tally.
//!
//! This crate provides the provider and layer abstractions used to reach a
//! chat completion service, the structured-output strategies, the
//! construct-and-validate loop for structured candidates, and the failure
//! taxonomy callers see.

pub mod error;
pub mod layer;
pub mod provider;
pub mod runtime;
pub mod strategy;
pub mod stream;
pub mod types;
pub mod validate;

// Re-exports
pub use error::{AiError, FailureKind, GatewayFailure};
pub use layer::{Layer, LayeredProvider};
pub use provider::Provider;
pub use runtime::{Completion, CompletionOutcome, Gateway, GatewayBuilder};
pub use strategy::{JsonModeStrategy, JsonOutputStrategy, JsonSchemaStrategy};
pub use stream::TokenStream;
pub use types::*;
pub use validate::{AcceptAll, Rejection, Validator};

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, AiError>;
