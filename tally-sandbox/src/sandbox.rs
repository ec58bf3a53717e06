//! Isolated execution of generated snippets.

use crate::dataset::DatasetHandle;
use crate::interpreter::InterpreterConfig;
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Environment variables forwarded to the interpreter. Everything else is
/// cleared, including provider credentials.
const FORWARDED_ENV: &[&str] = &["PATH", "HOME", "LANG"];

/// Result of running one snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub fault_occurred: bool,
    pub fault_message: String,
}

impl ExecutionOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            fault_occurred: false,
            fault_message: String::new(),
        }
    }

    pub fn fault(stdout: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            fault_occurred: true,
            fault_message: message.into(),
        }
    }
}

/// Runs a snippet against the dataset and reports what happened.
///
/// Implementations never fail: every problem is folded into the returned
/// [`ExecutionOutcome`].
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, snippet: &str, dataset: &DatasetHandle) -> ExecutionOutcome;
}

/// Sandbox backed by a fresh interpreter process per run.
///
/// Each process gets its own temporary working directory and a cleared
/// environment, so no variables or files survive between runs.
#[derive(Debug, Clone, Default)]
pub struct ProcessSandbox {
    config: InterpreterConfig,
}

impl ProcessSandbox {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    async fn execute(&self, script: String) -> io::Result<ExecutionOutcome> {
        let workdir = tempfile::tempdir()?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in FORWARDED_ENV {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        // Flush prints as they happen so a timed out run keeps its output.
        command.env("PYTHONUNBUFFERED", "1");

        let mut child = command.spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

        let feed = async move {
            let written = stdin.write_all(script.as_bytes()).await;
            drop(stdin);
            written
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let exchange = async {
            tokio::join!(
                feed,
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait()
            )
        };

        let finished = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.ok(),
            None => Some(exchange.await),
        };
        let Some((fed, read_out, read_err, status)) = finished else {
            if let Err(e) = child.start_kill() {
                tracing::debug!("failed to kill timed out interpreter: {}", e);
            }
            let limit = self.config.timeout.unwrap_or_default();
            return Ok(ExecutionOutcome::fault(
                String::from_utf8_lossy(&out).into_owned(),
                format!("execution timed out after {limit:?}"),
            ));
        };

        match fed {
            // The interpreter may exit before reading the whole script.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        read_out?;
        read_err?;
        let status = status?;

        let stdout = String::from_utf8_lossy(&out).into_owned();
        if status.success() {
            return Ok(ExecutionOutcome::success(stdout));
        }

        let stderr = String::from_utf8_lossy(&err);
        tracing::debug!("interpreter stderr:\n{}", stderr);
        Ok(ExecutionOutcome::fault(stdout, fault_message(&stderr, status)))
    }
}

fn pipe_missing(name: &str) -> io::Error {
    io::Error::other(format!("interpreter {name} unavailable"))
}

/// Last non-empty stderr line, which for Python is the exception itself.
fn fault_message(stderr: &str, status: ExitStatus) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("interpreter failed ({status})"))
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, snippet: &str, dataset: &DatasetHandle) -> ExecutionOutcome {
        let script = format!("{}\n{}\n", self.config.preamble(dataset), snippet);
        tracing::debug!("executing snippet:\n{}", snippet);

        let outcome = match self.execute(script).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::fault(
                String::new(),
                format!("failed to run {}: {e}", self.config.program),
            ),
        };

        if outcome.fault_occurred {
            tracing::warn!("snippet faulted: {}", outcome.fault_message);
        } else {
            tracing::debug!("snippet ran, {} bytes of output", outcome.stdout.len());
        }
        outcome
    }
}
