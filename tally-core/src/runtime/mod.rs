//! Runtime layer for Tally Core.
//!
//! The [`Gateway`] sits between callers and the provider interface. It is
//! responsible for:
//! - lowering [`CompletionRequest`](crate::types::CompletionRequest)s to chat
//!   completion requests
//! - selecting the JSON output strategy for structured requests
//! - running the construct-and-validate loop for structured candidates
//! - classifying every failure into a [`GatewayFailure`](crate::GatewayFailure)

pub mod gateway;

pub use gateway::{Completion, CompletionOutcome, Gateway, GatewayBuilder};
