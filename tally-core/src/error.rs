//! Error types for Tally Core operations.

use std::fmt;

/// Transport-level error produced by providers and layers.
///
/// This never leaves the [`Gateway`](crate::runtime::Gateway): it is
/// classified into a [`GatewayFailure`] at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    /// Provider-specific errors
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limit errors
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Model not found errors
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Timeout errors
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stream errors
    #[error("Stream error: {0}")]
    Stream(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl AiError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimit(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a model not found error
    pub fn model_not_found(msg: impl Into<String>) -> Self {
        Self::ModelNotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::Network(_) | AiError::Timeout(_) | AiError::RateLimit(_)
        )
    }

    /// Map this error onto the gateway failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AiError::InvalidRequest(_)
            | AiError::Authentication(_)
            | AiError::ModelNotFound(_)
            | AiError::Configuration(_)
            | AiError::Unsupported(_) => FailureKind::MalformedRequest,
            AiError::RateLimit(_) => FailureKind::Throttled,
            _ => FailureKind::Unknown,
        }
    }
}

impl From<String> for AiError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for AiError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

/// Classification of everything that can go wrong behind the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The service rejected the request as invalid.
    MalformedRequest,
    /// Rate or resource limiting.
    Throttled,
    /// Network, deserialization and anything unclassified.
    Unknown,
    /// Every structured candidate was rejected by its validator.
    ValidationExhausted,
}

impl FailureKind {
    /// Short, non-technical message suitable for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::MalformedRequest => {
                "Something went wrong while connecting with the language model, try again soon!"
            }
            FailureKind::Throttled => {
                "The language model servers seem to be overloaded, try again later!"
            }
            FailureKind::Unknown => {
                "Something went wrong while talking to the language model API."
            }
            FailureKind::ValidationExhausted => {
                "I could not produce a working analysis for this question."
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::MalformedRequest => "malformed_request",
            FailureKind::Throttled => "throttled",
            FailureKind::Unknown => "unknown",
            FailureKind::ValidationExhausted => "validation_exhausted",
        };
        f.write_str(name)
    }
}

/// The single error value the gateway hands back to callers.
///
/// `message` is meant for users, `detail` for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct GatewayFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

impl GatewayFailure {
    /// Build a failure of `kind` with the kind's user message.
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
            detail: detail.into(),
        }
    }

    /// Whether every candidate was rejected by validation, as opposed to a
    /// transport problem.
    pub fn is_rejection(&self) -> bool {
        self.kind == FailureKind::ValidationExhausted
    }
}

impl From<&AiError> for GatewayFailure {
    fn from(err: &AiError) -> Self {
        Self::new(err.failure_kind(), err.to_string())
    }
}

impl From<AiError> for GatewayFailure {
    fn from(err: AiError) -> Self {
        Self::from(&err)
    }
}
