//! Batch processing of a JSON Lines query file.
//!
//! Every line holds a [`QueryRecord`]. Queries run one after another and the
//! whole file is rewritten after each one, so an interruption after record
//! *k* leaves exactly the first *k* answers on disk.

use crate::orchestrator::{Answer, Orchestrator, PipelineOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One line of the batch file. Keys other than `query` and
/// `generated_output` are kept as they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query: String,
    #[serde(default)]
    pub generated_output: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to access batch file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Anything that turns a query into the text stored in `generated_output`.
#[async_trait]
pub trait QueryProcessor: Send + Sync {
    async fn process(&self, query: &str) -> Option<String>;
}

#[async_trait]
impl QueryProcessor for Orchestrator {
    async fn process(&self, query: &str) -> Option<String> {
        match self.answer(query).await {
            PipelineOutcome::Answered(Answer::Text(text)) => Some(text),
            PipelineOutcome::Answered(Answer::Streamed) => None,
            PipelineOutcome::Rejected { justification } => {
                Some(format!("Query rejected: {justification}"))
            }
            PipelineOutcome::Failed(failure) => {
                tracing::error!("{}", failure);
                None
            }
        }
    }
}

/// Counts reported at the end of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub answered: usize,
}

/// Runs every record of a batch file through a [`QueryProcessor`].
#[derive(Debug, Clone)]
pub struct BatchRunner {
    path: PathBuf,
}

impl BatchRunner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run<P: QueryProcessor + ?Sized>(
        &self,
        processor: &P,
    ) -> Result<BatchSummary, BatchError> {
        let mut records = read_records(&self.path)?;
        let total = records.len();
        tracing::info!("running batch of {} queries from {}", total, self.path.display());

        let mut summary = BatchSummary::default();
        for index in 0..total {
            let query = records[index].query.clone();
            tracing::info!("processing query {}/{}: {}", index + 1, total, query);

            let output = processor.process(&query).await;
            if output.is_some() {
                summary.answered += 1;
            }
            records[index].generated_output = output;
            summary.processed += 1;

            write_records(&self.path, &records)?;
            tracing::info!("saved progress after query {}/{}", index + 1, total);
        }

        tracing::info!(
            "processed all {} queries ({} answered) and updated {}",
            summary.processed,
            summary.answered,
            self.path.display()
        );
        Ok(summary)
    }
}

/// Blank lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<QueryRecord>, BatchError> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| BatchError::Parse {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Replace the file atomically with `records`.
fn write_records(path: &Path, records: &[QueryRecord]) -> Result<(), BatchError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = io::BufWriter::new(file.as_file_mut());
        for record in records {
            let line = serde_json::to_string(record).map_err(BatchError::Encode)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| BatchError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers by upper-casing and records the file as it stood before each
    /// query.
    struct Shouting {
        path: PathBuf,
        snapshots: Mutex<Vec<Vec<QueryRecord>>>,
    }

    #[async_trait]
    impl QueryProcessor for Shouting {
        async fn process(&self, query: &str) -> Option<String> {
            self.snapshots
                .lock()
                .unwrap()
                .push(read_records(&self.path).unwrap());
            if query == "skip" {
                None
            } else {
                Some(query.to_uppercase())
            }
        }
    }

    fn batch_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.jsonl");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_progress_is_persisted_after_each_query() {
        let (_dir, path) = batch_file(
            "{\"query\": \"a\", \"generated_output\": \"stale\"}\n\
             {\"query\": \"b\"}\n\
             {\"query\": \"c\"}\n",
        );
        let processor = Shouting {
            path: path.clone(),
            snapshots: Mutex::new(Vec::new()),
        };

        let summary = BatchRunner::new(&path).run(&processor).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 3, answered: 3 });

        let snapshots = processor.snapshots.into_inner().unwrap();
        let outputs = |records: &Vec<QueryRecord>| -> Vec<Option<String>> {
            records.iter().map(|r| r.generated_output.clone()).collect()
        };
        assert_eq!(outputs(&snapshots[0]), vec![Some("stale".to_string()), None, None]);
        assert_eq!(outputs(&snapshots[1]), vec![Some("A".to_string()), None, None]);
        assert_eq!(
            outputs(&snapshots[2]),
            vec![Some("A".to_string()), Some("B".to_string()), None]
        );

        let finished = read_records(&path).unwrap();
        assert_eq!(
            outputs(&finished),
            vec![Some("A".to_string()), Some("B".to_string()), Some("C".to_string())]
        );
    }

    #[tokio::test]
    async fn test_extra_keys_survive_rewrite() {
        let (_dir, path) = batch_file("{\"query\": \"skip\", \"id\": 7, \"tags\": [\"x\"]}\n\n");
        let processor = Shouting {
            path: path.clone(),
            snapshots: Mutex::new(Vec::new()),
        };

        let summary = BatchRunner::new(&path).run(&processor).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 1, answered: 0 });

        let line = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["tags"][0], "x");
        assert!(value["generated_output"].is_null());
    }

    #[test]
    fn test_parse_error_names_line() {
        let (_dir, path) = batch_file("{\"query\": \"ok\"}\nnot json\n");
        match read_records(&path).unwrap_err() {
            BatchError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
