//! Errors raised while preparing the dataset.
//!
//! Running a snippet never fails with these: execution faults are reported
//! through [`ExecutionOutcome`](crate::ExecutionOutcome).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("dataset file not found: {0}")]
    DatasetNotFound(PathBuf),

    #[error("dataset {path} is missing declared columns: {missing:?}")]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
