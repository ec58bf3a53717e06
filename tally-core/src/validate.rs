//! Construct-and-validate support for structured output.
//!
//! A structured response is only a *candidate* until a [`Validator`] turns
//! it into its output type. Validators may run side effects (executing code,
//! probing a database); a rejection is fed back to the model and a new
//! candidate is requested, up to the request's retry budget.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Typed rejection of a structured candidate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    /// Reason shown to the model on the next attempt.
    pub reason: String,
    /// The rejected candidate as it stood when it was rejected, if the
    /// validator wants it logged.
    pub candidate: Option<serde_json::Value>,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            candidate: None,
        }
    }
}

/// Factory turning a raw candidate into a validated value.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Shape the model is asked to produce.
    type Candidate: DeserializeOwned + Send;
    /// Value handed to the caller once the candidate is accepted.
    type Output: Send;

    /// Accept or reject one candidate.
    async fn validate(&self, candidate: Self::Candidate) -> Result<Self::Output, Rejection>;
}

/// Validator that accepts every candidate that deserializes.
#[derive(Debug)]
pub struct AcceptAll<T>(std::marker::PhantomData<fn() -> T>);

impl<T> AcceptAll<T> {
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T> Default for AcceptAll<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> Validator for AcceptAll<T> {
    type Candidate = T;
    type Output = T;

    async fn validate(&self, candidate: T) -> Result<T, Rejection> {
        Ok(candidate)
    }
}

/// Corrective message appended after a rejected candidate.
pub(crate) fn reask_message(reason: &str) -> String {
    format!(
        "Your previous response was rejected with the following error:\n\n{reason}\n\n\
        Fix the problem and respond again with a complete, valid object."
    )
}
