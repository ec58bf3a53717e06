//! # Tally Sandbox
//!
//! The dataset handle and the execution sandbox that generated snippets run
//! in. A snippet is prefixed with a fixed preamble that binds the dataset,
//! run in a fresh interpreter process, and reduced to an
//! [`ExecutionOutcome`]: captured stdout plus an optional fault.

pub mod dataset;
pub mod error;
pub mod interpreter;
pub mod sandbox;

pub use dataset::{
    online_retail_columns, Column, ColumnKind, DatasetConfig, DatasetFormat, DatasetHandle,
};
pub use error::SandboxError;
pub use interpreter::{Dialect, InterpreterConfig};
pub use sandbox::{ExecutionOutcome, ProcessSandbox, Sandbox};
