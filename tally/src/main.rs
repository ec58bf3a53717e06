//! Command line entry point.
//!
//! Usage:
//!   tally --query "What is the average purchase value?"
//!   tally --process-batch --batch-file data/test_queries.jsonl
//!   tally --config tally.toml --stream --query "Top 5 countries by revenue"

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tally::completion::Gateway;
use tally::config::ProviderKind;
use tally::layer::{LoggingLayer, RetryLayer};
use tally::provider::OpenAiProvider;
use tally::sandbox::{DatasetHandle, ProcessSandbox};
use tally::{telemetry, Answer, BatchRunner, Orchestrator, PipelineOutcome, Settings};

const DEFAULT_QUERY: &str = "What is the average customer lifetime value?";

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Answer questions about a tabular dataset")]
struct Args {
    /// Question to ask
    #[arg(long)]
    query: Option<String>,

    /// Process every query of the batch file instead of a single question
    #[arg(long)]
    process_batch: bool,

    /// JSON Lines file with `query` records
    #[arg(long)]
    batch_file: Option<PathBuf>,

    /// Settings file (defaults to ./tally.toml when present)
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Stream the final answer as it is generated
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    telemetry::init();

    let mut settings = Settings::load(args.config.as_deref())?;
    if args.stream {
        settings.stream_answer = true;
    }
    if let Some(batch_file) = args.batch_file {
        settings.batch_file = batch_file;
    }

    let orchestrator = build_orchestrator(&settings)?;

    if args.process_batch {
        tracing::info!("running in batch mode with file: {}", settings.batch_file.display());
        let orchestrator = orchestrator.without_streaming();
        let summary = BatchRunner::new(&settings.batch_file)
            .run(&orchestrator)
            .await
            .with_context(|| format!("batch {} failed", settings.batch_file.display()))?;
        println!(
            "Processed {} queries ({} answered), results in {}",
            summary.processed,
            summary.answered,
            settings.batch_file.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let query = args.query.unwrap_or_else(|| DEFAULT_QUERY.to_string());
    let started = Instant::now();
    let outcome = orchestrator.answer(&query).await;
    tracing::info!("time taken for whole process: {:?}", started.elapsed());

    match outcome {
        PipelineOutcome::Answered(Answer::Text(text)) => {
            println!("{text}");
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::Answered(Answer::Streamed) => Ok(ExitCode::SUCCESS),
        PipelineOutcome::Rejected { justification } => {
            println!("Sorry, I can only answer data analysis questions about this dataset.");
            println!("{justification}");
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::Failed(failure) => {
            eprintln!("{}", failure.message);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let api_key = Settings::api_key(|key| std::env::var(key).ok())?;

    let mut builder = OpenAiProvider::builder().api_key(api_key);
    let (id, name) = match settings.provider {
        ProviderKind::OpenAi => ("openai", "OpenAI"),
        ProviderKind::DeepSeek => {
            if settings.api_base.is_none() {
                builder = builder.api_base(tally::provider::DEEPSEEK_API_BASE);
            }
            ("deepseek", "DeepSeek")
        }
    };
    if let Some(api_base) = &settings.api_base {
        builder = builder.api_base(api_base.as_str());
    }
    let provider = builder.build_with_id(id, name)?;

    let gateway = Gateway::builder(provider)
        .layer(RetryLayer::new().with_max_retries(settings.transport_retries))
        .layer(LoggingLayer::new())
        .finish();

    let dataset = Arc::new(
        DatasetHandle::load(settings.dataset.clone())
            .with_context(|| format!("cannot load dataset {}", settings.dataset.path.display()))?,
    );
    let sandbox = Arc::new(ProcessSandbox::new(settings.interpreter.clone()));

    Ok(Orchestrator::new(
        gateway,
        sandbox,
        dataset,
        settings.interpreter.dialect,
        settings.pipeline(),
    ))
}
