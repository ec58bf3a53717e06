//! The question answering pipeline.
//!
//! Each call to [`Orchestrator::answer`] walks `Routing -> Planning ->
//! Synthesizing -> Done` and stops early in `Rejected` (the router declined
//! the query) or `Failed` (a stage could not complete). Failures never
//! escape as errors: they become a [`PipelineOutcome`].

use crate::models::{
    response_schema, ExecutionPlan, PlanCandidate, PlanValidator, QueryRouting, RoutingValidator,
};
use crate::prompts;
use futures::StreamExt;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tally_core::{
    Completion, CompletionRequest, Gateway, GatewayFailure, ReasoningEffort, TokenStream,
};
use tally_sandbox::{DatasetHandle, Dialect, Sandbox};
use tracing::Instrument;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Routing,
    Planning,
    Synthesizing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Routing => "Routing",
            Stage::Planning => "Planning",
            Stage::Synthesizing => "Synthesizing",
            Stage::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Final answer of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    /// The answer was streamed into the [`AnswerSink`].
    Streamed,
}

/// Why a run stopped before answering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct PipelineFailure {
    pub stage: Stage,
    /// Short, user-facing explanation.
    pub message: String,
}

impl PipelineFailure {
    fn from_gateway(stage: Stage, failure: GatewayFailure) -> Self {
        tracing::error!(stage = %stage, kind = %failure.kind, "{}", failure.detail);
        Self {
            stage,
            message: failure.message,
        }
    }
}

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Answered(Answer),
    Rejected { justification: String },
    Failed(PipelineFailure),
}

/// Destination of streamed answer fragments.
pub trait AnswerSink: Send + Sync {
    fn emit(&self, fragment: &str) -> io::Result<()>;

    /// Called once after the last fragment.
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes fragments to stdout as they arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl AnswerSink for StdoutSink {
    fn emit(&self, fragment: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()
    }

    fn finish(&self) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(b"\n")?;
        stdout.flush()
    }
}

/// Knobs of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model: String,
    pub route_queries: bool,
    pub routing_retries: u32,
    pub planning_retries: u32,
    pub stream_answer: bool,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub max_tokens: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            route_queries: true,
            routing_retries: 1,
            planning_retries: 3,
            stream_answer: false,
            reasoning_effort: None,
            max_tokens: None,
        }
    }
}

/// Sequences routing, planning and synthesis for one query at a time.
pub struct Orchestrator {
    gateway: Gateway,
    plan_validator: PlanValidator,
    dataset: Arc<DatasetHandle>,
    dialect: Dialect,
    config: PipelineConfig,
    sink: Arc<dyn AnswerSink>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gateway", &self.gateway)
            .field("dataset", &self.dataset.name())
            .field("dialect", &self.dialect)
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        gateway: Gateway,
        sandbox: Arc<dyn Sandbox>,
        dataset: Arc<DatasetHandle>,
        dialect: Dialect,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            plan_validator: PlanValidator::new(sandbox, dataset.clone()),
            dataset,
            dialect,
            config,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Send streamed answers somewhere other than stdout.
    pub fn with_sink(mut self, sink: Arc<dyn AnswerSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Buffer answers instead of streaming them.
    pub fn without_streaming(mut self) -> Self {
        self.config.stream_answer = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer one query.
    pub async fn answer(&self, query: &str) -> PipelineOutcome {
        let span = tracing::info_span!("query", query = %query);
        async move {
            match self.run(query).await {
                Ok(outcome) => outcome,
                Err(failure) => PipelineOutcome::Failed(failure),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &str) -> Result<PipelineOutcome, PipelineFailure> {
        if self.config.route_queries {
            let routing = self
                .route(query)
                .instrument(tracing::info_span!("stage", name = %Stage::Routing))
                .await?;
            if !routing.is_in_domain {
                tracing::info!("query rejected: {}", routing.justification);
                return Ok(PipelineOutcome::Rejected {
                    justification: routing.justification,
                });
            }
        }

        let plan = self
            .plan(query)
            .instrument(tracing::info_span!("stage", name = %Stage::Planning))
            .await?;

        let answer = self
            .synthesize(query, &plan)
            .instrument(tracing::info_span!("stage", name = %Stage::Synthesizing))
            .await?;

        tracing::info!("{}", Stage::Done);
        Ok(PipelineOutcome::Answered(answer))
    }

    fn request(&self, system: impl Into<String>, user: impl Into<String>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.config.model.as_str(), system, user);
        if let Some(effort) = self.config.reasoning_effort {
            request = request.with_reasoning_effort(effort);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    async fn route(&self, query: &str) -> Result<QueryRouting, PipelineFailure> {
        tracing::info!("classifying query");
        let request = self
            .request(prompts::routing_system(&self.dataset), query)
            .with_schema(response_schema::<QueryRouting>("QueryRouting"))
            .with_max_retries(self.config.routing_retries);

        let completion = self
            .gateway
            .complete_validated(request, &RoutingValidator)
            .await
            .map_err(|f| PipelineFailure::from_gateway(Stage::Routing, f))?;
        structured(Stage::Routing, completion)
    }

    async fn plan(&self, query: &str) -> Result<ExecutionPlan, PipelineFailure> {
        tracing::info!("generating task plan and executing code");
        let request = self
            .request(prompts::plan_system(&self.dataset, self.dialect), query)
            .with_schema(response_schema::<PlanCandidate>("ExecutionPlan"))
            .with_max_retries(self.config.planning_retries);

        let completion = self
            .gateway
            .complete_validated(request, &self.plan_validator)
            .await
            .map_err(|f| PipelineFailure::from_gateway(Stage::Planning, f))?;
        structured(Stage::Planning, completion)
    }

    async fn synthesize(
        &self,
        query: &str,
        plan: &ExecutionPlan,
    ) -> Result<Answer, PipelineFailure> {
        tracing::info!("generating final answer");
        let prompt = prompts::synthesis_prompt(query, plan.code_to_execute(), plan.result());
        let request = self
            .request(prompts::SYNTHESIZER_SYSTEM, prompt)
            .with_stream(self.config.stream_answer);

        let completion = self
            .gateway
            .complete(request)
            .await
            .map_err(|f| PipelineFailure::from_gateway(Stage::Synthesizing, f))?;

        match completion {
            Completion::Text(text) => Ok(Answer::Text(text)),
            Completion::Stream(stream) => {
                self.drain(stream).await?;
                Ok(Answer::Streamed)
            }
            Completion::Structured(_) => Err(unexpected(Stage::Synthesizing)),
        }
    }

    async fn drain(&self, mut stream: TokenStream) -> Result<(), PipelineFailure> {
        let write_failed = |e: io::Error| {
            tracing::error!("failed to write answer: {}", e);
            PipelineFailure {
                stage: Stage::Synthesizing,
                message: "The answer could not be written.".to_string(),
            }
        };

        while let Some(fragment) = stream.next().await {
            let fragment =
                fragment.map_err(|f| PipelineFailure::from_gateway(Stage::Synthesizing, f))?;
            self.sink.emit(&fragment).map_err(write_failed)?;
        }
        tracing::debug!("streamed {} fragments", stream.fragments());
        self.sink.finish().map_err(write_failed)
    }
}

fn structured<T>(stage: Stage, completion: Completion<T>) -> Result<T, PipelineFailure> {
    completion.into_structured().ok_or_else(|| unexpected(stage))
}

fn unexpected(stage: Stage) -> PipelineFailure {
    tracing::error!("unexpected completion shape in {}", stage);
    PipelineFailure {
        stage,
        message: "The language model returned an unexpected response.".to_string(),
    }
}
