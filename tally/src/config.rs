//! Settings loaded from `tally.toml` and the environment.

use crate::orchestrator::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tally_core::ReasoningEffort;
use tally_sandbox::{DatasetConfig, DatasetFormat, InterpreterConfig};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "tally.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
}

/// Which completion service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    DeepSeek,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderKind,
    pub model: String,
    /// OpenAI-compatible endpoint; the official API when unset.
    pub api_base: Option<String>,
    pub route_queries: bool,
    pub routing_retries: u32,
    pub planning_retries: u32,
    /// Retries of transient transport errors, per model call.
    pub transport_retries: u32,
    pub stream_answer: bool,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Completion length cap; the service default when unset.
    pub max_tokens: Option<u32>,
    pub batch_file: PathBuf,
    pub dataset: DatasetConfig,
    pub interpreter: InterpreterConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            api_base: None,
            route_queries: true,
            routing_retries: 1,
            planning_retries: 3,
            transport_retries: 2,
            stream_answer: false,
            reasoning_effort: None,
            max_tokens: None,
            batch_file: PathBuf::from("data/test_queries.jsonl"),
            dataset: DatasetConfig::new(
                "data/online_retail_II.xlsx",
                DatasetFormat::Excel {
                    sheet: "Year 2009-2010".to_string(),
                },
            ),
            interpreter: InterpreterConfig::pandas(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_CONFIG_FILE`] if present,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `TALLY_MODEL` and `OPENAI_API_BASE`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup("TALLY_MODEL").filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        if let Some(base) = lookup("OPENAI_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.api_base = Some(base);
        }
        self
    }

    /// The provider API key from `OPENAI_API_KEY`.
    pub fn api_key(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
        lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.model.clone(),
            route_queries: self.route_queries,
            routing_retries: self.routing_retries,
            planning_retries: self.planning_retries,
            stream_answer: self.stream_answer,
            reasoning_effort: self.reasoning_effort,
            max_tokens: self.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tally_sandbox::Dialect;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.planning_retries, 3);
        assert_eq!(settings.transport_retries, 2);
        assert_eq!(settings.interpreter.dialect, Dialect::Pandas);
    }

    #[test]
    fn test_file_overrides() {
        let settings = Settings::from_toml(
            r#"
provider = "deepseek"
model = "o3-mini"
reasoning_effort = "high"
max_tokens = 8000
route_queries = false
planning_retries = 5

[dataset]
path = "sales.csv"
format = { kind = "csv" }

[interpreter]
program = "sh"
args = ["-s"]
dialect = "shell"
timeout = 30
"#,
        )
        .unwrap();

        assert_eq!(settings.provider, ProviderKind::DeepSeek);
        assert_eq!(settings.model, "o3-mini");
        assert_eq!(settings.reasoning_effort, Some(ReasoningEffort::High));
        assert_eq!(settings.pipeline().max_tokens, Some(8000));
        assert!(!settings.route_queries);
        assert_eq!(settings.planning_retries, 5);
        assert_eq!(settings.routing_retries, 1);
        assert_eq!(settings.dataset.format, DatasetFormat::Csv);
        assert_eq!(settings.dataset.columns.len(), 8);
        assert_eq!(settings.interpreter.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("TALLY_MODEL", "gpt-4o-mini"), ("OPENAI_API_BASE", "")]
            .into_iter()
            .collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let settings = Settings::default().with_env(lookup);
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.api_base, None);
        assert!(matches!(
            Settings::api_key(lookup),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_bad_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"planning_retries = \"many\"").unwrap();
        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
