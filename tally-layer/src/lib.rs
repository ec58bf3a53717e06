//! # Tally Layers
//!
//! Transport-level layers wrapped around a provider.
//!
//! - `LoggingLayer`: logs every provider call with its timing
//! - `RetryLayer`: retries retryable transport errors with exponential backoff
//!
//! These retries are independent of the semantic retry budget carried by a
//! structured `CompletionRequest`: a layer retries one HTTP exchange, the
//! gateway retries a rejected candidate.
//!
//! ```ignore
//! use tally_core::Gateway;
//! use tally_layer::{LoggingLayer, RetryLayer};
//!
//! let gateway = Gateway::builder(provider)
//!     .layer(RetryLayer::new().with_max_retries(2))
//!     .layer(LoggingLayer::new())
//!     .finish();
//! ```

pub mod logging;
pub mod retry;

// Re-exports
pub use logging::LoggingLayer;
pub use retry::RetryLayer;
