//! # Tally
//!
//! Answers natural-language questions about a tabular dataset. A language
//! model writes a code snippet, the snippet runs in a sandbox against the
//! dataset, failed runs are fed back for another attempt, and the accepted
//! output is turned into a prose answer.
//!
//! ```ignore
//! let gateway = Gateway::builder(provider)
//!     .layer(RetryLayer::new())
//!     .layer(LoggingLayer::new())
//!     .finish();
//! let orchestrator = Orchestrator::new(
//!     gateway,
//!     sandbox,
//!     dataset,
//!     Dialect::Pandas,
//!     PipelineConfig::default(),
//! );
//!
//! match orchestrator.answer("What is the average purchase value?").await {
//!     PipelineOutcome::Answered(Answer::Text(text)) => println!("{text}"),
//!     other => eprintln!("{other:?}"),
//! }
//! ```

pub mod batch;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod telemetry;

pub use batch::{BatchError, BatchRunner, BatchSummary, QueryProcessor, QueryRecord};
pub use config::{ConfigError, Settings};
pub use models::{ExecutionPlan, PlanCandidate, PlanValidator, QueryRouting, RoutingValidator};
pub use orchestrator::{
    Answer, AnswerSink, Orchestrator, PipelineConfig, PipelineFailure, PipelineOutcome, Stage,
    StdoutSink,
};

pub mod completion {
    //! Completion gateway, provider traits and failure taxonomy.
    pub use tally_core::*;
}

pub mod provider {
    //! Completion service providers.
    pub use tally_provider::*;
}

pub mod layer {
    //! Transport layers.
    pub use tally_layer::*;
}

pub mod sandbox {
    //! Dataset handle and execution sandbox.
    pub use tally_sandbox::*;
}
