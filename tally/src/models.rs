//! Structured outputs requested from the model and their validators.
//!
//! Both [`QueryRouting`] and [`ExecutionPlan`] are only obtainable through a
//! [`Validator`]: the gateway keeps asking for new candidates until one is
//! accepted or the retry budget runs out.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::{ResponseSchema, Rejection, Validator};
use tally_sandbox::{DatasetHandle, Sandbox};

/// JSON schema of `T`, named for the structured-output request.
pub fn response_schema<T: JsonSchema>(name: &str) -> ResponseSchema {
    ResponseSchema::new(name, schemars::schema_for!(T).to_value())
}

/// Validate the user query. Decide whether it is a data analysis question
/// about the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryRouting {
    /// Is the user query related to data analysis of the dataset? Think
    /// step-by-step and write down your chain of thought here.
    pub chain_of_thought: String,
    /// Based on the previous reasoning, true if the query is a data analysis
    /// question about the dataset, false otherwise.
    pub is_in_domain: bool,
    /// Explain why the query is in domain or not. Which keywords decide it?
    pub justification: String,
}

/// Accepts routings whose reasoning fields are filled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingValidator;

#[async_trait]
impl Validator for RoutingValidator {
    type Candidate = QueryRouting;
    type Output = QueryRouting;

    async fn validate(&self, candidate: QueryRouting) -> Result<QueryRouting, Rejection> {
        if candidate.chain_of_thought.trim().is_empty() {
            return Err(Rejection::new(
                "chain_of_thought is empty: reason about the query before deciding.",
            ));
        }
        if candidate.justification.trim().is_empty() {
            return Err(Rejection::new(
                "justification is empty: explain why the query is or is not in domain.",
            ));
        }
        Ok(candidate)
    }
}

/// Generates code to be executed over the dataset. Avoid import statements.
/// If the query filters on a free-text column, include variations of the
/// phrase that could mean the same thing. Print the output at the end, only
/// the relevant columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanCandidate {
    /// The user query that you need to answer using the dataset.
    pub user_query: String,
    /// How will you answer the user_query using the dataset? Think
    /// step-by-step. What will you print as a result? Will the code be free
    /// of bugs?
    pub chain_of_thought: String,
    /// Based on the previous reasoning, write bug-free code. Avoid import
    /// statements. Print the relevant values.
    pub code_to_execute: String,
    /// Reflect on the generated code: true if it is safe, will run without
    /// issues and answers the user query, false otherwise.
    pub is_code_bug_free: bool,
}

/// A plan whose code has run without fault.
///
/// There is no public constructor; [`PlanValidator`] is the only way to get
/// one, so `result` is always the captured output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    user_query: String,
    chain_of_thought: String,
    code_to_execute: String,
    is_code_bug_free: bool,
    result: String,
}

impl ExecutionPlan {
    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn chain_of_thought(&self) -> &str {
        &self.chain_of_thought
    }

    pub fn code_to_execute(&self) -> &str {
        &self.code_to_execute
    }

    pub fn is_code_bug_free(&self) -> bool {
        self.is_code_bug_free
    }

    pub fn result(&self) -> &str {
        &self.result
    }
}

/// Runs each candidate's code in the sandbox and accepts it only if the run
/// is fault-free and printed something.
#[derive(Clone)]
pub struct PlanValidator {
    sandbox: Arc<dyn Sandbox>,
    dataset: Arc<DatasetHandle>,
}

impl std::fmt::Debug for PlanValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanValidator")
            .field("dataset", &self.dataset.name())
            .finish()
    }
}

impl PlanValidator {
    pub fn new(sandbox: Arc<dyn Sandbox>, dataset: Arc<DatasetHandle>) -> Self {
        Self { sandbox, dataset }
    }
}

#[async_trait]
impl Validator for PlanValidator {
    type Candidate = PlanCandidate;
    type Output = ExecutionPlan;

    async fn validate(&self, candidate: PlanCandidate) -> Result<ExecutionPlan, Rejection> {
        let outcome = self
            .sandbox
            .run(&candidate.code_to_execute, &self.dataset)
            .await;

        if outcome.fault_occurred {
            let reason = format!("An error occurred: {}", outcome.fault_message);
            tracing::error!("{}", reason);
            let rejected = PlanCandidate {
                is_code_bug_free: false,
                ..candidate
            };
            return Err(Rejection {
                reason,
                candidate: serde_json::to_value(&rejected).ok(),
            });
        }

        tracing::info!("code execution ran successfully");
        Ok(ExecutionPlan {
            user_query: candidate.user_query,
            chain_of_thought: candidate.chain_of_thought,
            code_to_execute: candidate.code_to_execute,
            is_code_bug_free: candidate.is_code_bug_free,
            result: outcome.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tally_sandbox::{
        Column, ColumnKind, DatasetConfig, DatasetFormat, ExecutionOutcome, InterpreterConfig,
        ProcessSandbox,
    };

    fn dataset() -> (tempfile::NamedTempFile, Arc<DatasetHandle>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"customer,amount\nc1,10\n").unwrap();
        let config = DatasetConfig::new(file.path(), DatasetFormat::Csv).with_columns(vec![
            Column::new("customer", ColumnKind::Identifier),
            Column::new("amount", ColumnKind::Numeric),
        ]);
        (file, Arc::new(DatasetHandle::load(config).unwrap()))
    }

    fn candidate(code: &str) -> PlanCandidate {
        PlanCandidate {
            user_query: "how many rows?".to_string(),
            chain_of_thought: "count lines".to_string(),
            code_to_execute: code.to_string(),
            is_code_bug_free: true,
        }
    }

    fn validator(data: Arc<DatasetHandle>) -> PlanValidator {
        PlanValidator::new(
            Arc::new(ProcessSandbox::new(InterpreterConfig::shell())),
            data,
        )
    }

    #[tokio::test]
    async fn test_result_is_captured_stdout() {
        let (_file, data) = dataset();
        let plan = validator(data).validate(candidate("echo 42")).await.unwrap();
        assert_eq!(plan.result(), "42\n");
        assert!(plan.is_code_bug_free());
        assert_eq!(plan.code_to_execute(), "echo 42");
    }

    #[tokio::test]
    async fn test_fault_rejects_and_marks_candidate() {
        let (_file, data) = dataset();
        let rejection = validator(data)
            .validate(candidate("echo \"KeyError: 'Revenue'\" >&2\nexit 1"))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, "An error occurred: KeyError: 'Revenue'");
        let rejected = rejection.candidate.unwrap();
        assert_eq!(rejected["is_code_bug_free"], serde_json::Value::Bool(false));
    }

    #[tokio::test]
    async fn test_empty_result_is_accepted() {
        let (_file, data) = dataset();
        let code = "awk -F, 'NR > 1 && $2 > 500 { print }' \"$DATASET\"";
        let plan = validator(data).validate(candidate(code)).await.unwrap();
        assert_eq!(plan.result(), "");

        let prompt = crate::prompts::synthesis_prompt(
            plan.user_query(),
            plan.code_to_execute(),
            plan.result(),
        );
        assert!(prompt.contains("<exec_tool_output>\n\n</exec_tool_output>"));
    }

    struct Canned(ExecutionOutcome);

    #[async_trait]
    impl Sandbox for Canned {
        async fn run(&self, _snippet: &str, _dataset: &DatasetHandle) -> ExecutionOutcome {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_fault_wins_over_output() {
        let (_file, data) = dataset();
        let validator = PlanValidator::new(
            Arc::new(Canned(ExecutionOutcome::fault("half a table\n", "boom"))),
            data,
        );
        let rejection = validator.validate(candidate("anything")).await.unwrap_err();
        assert_eq!(rejection.reason, "An error occurred: boom");
    }

    #[tokio::test]
    async fn test_routing_requires_reasoning() {
        let routing = QueryRouting {
            chain_of_thought: "It asks about sales.".to_string(),
            is_in_domain: false,
            justification: " ".to_string(),
        };
        let rejection = RoutingValidator.validate(routing.clone()).await.unwrap_err();
        assert!(rejection.reason.starts_with("justification"));

        let accepted = RoutingValidator
            .validate(QueryRouting {
                justification: "Mentions invoices.".to_string(),
                ..routing
            })
            .await
            .unwrap();
        assert!(!accepted.is_in_domain);
    }

    #[test]
    fn test_plan_schema_lists_candidate_fields() {
        let schema = response_schema::<PlanCandidate>("ExecutionPlan");
        assert_eq!(schema.name, "ExecutionPlan");
        let properties = schema.schema["properties"].as_object().unwrap();
        for field in ["user_query", "chain_of_thought", "code_to_execute", "is_code_bug_free"] {
            assert!(properties.contains_key(field), "missing {field}");
        }
        assert!(!properties.contains_key("result"));
    }
}
