//! Configuration types for the Noesis orchestrator

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NoesisError, Result};

/// Main configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NoesisConfig {
    /// LLM oracle configuration
    pub oracle: OracleConfig,

    /// Workflow engine configuration
    pub workflow: WorkflowConfig,

    /// Retrieval backend configuration
    pub retrieval: RetrievalConfig,

    /// Context compiler configuration
    pub context: ContextConfig,
}

/// LLM oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Model identifier sent to the provider
    pub model: String,

    /// Sampling temperature; kept low so routing decisions stay stable
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: usize,

    /// Timeout for a single oracle call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum loopback retries before the fallback contract applies
    pub max_retries: u32,

    /// Minimum overall grade for an answer to be accepted
    pub acceptance_threshold: f32,

    /// Wall-clock ceiling for a complete run
    #[serde(with = "humantime_serde")]
    pub wall_clock_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            acceptance_threshold: 0.7,
            wall_clock_timeout: Duration::from_secs(300),
        }
    }
}

/// Retrieval backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Base URL of the knowledge store service
    pub knowledge_store_url: Option<String>,

    /// Path of the knowledge store query endpoint
    pub knowledge_store_query_path: String,

    /// API key for the web search backend; the backend is disabled when absent
    pub web_api_key: Option<String>,

    /// Number of web results to request
    pub web_top_k: usize,

    /// Timeout for a single backend call
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            knowledge_store_url: None,
            knowledge_store_query_path: "/query".to_string(),
            web_api_key: None,
            web_top_k: 5,
            backend_timeout: Duration::from_secs(30),
        }
    }
}

/// Context compiler budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of context items after compilation
    pub max_items: usize,

    /// Maximum total characters across compiled item texts
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_items: 12,
            max_chars: 8_000,
        }
    }
}

/// Per-call overrides applied on top of [`WorkflowConfig`]
#[derive(Debug, Clone, Default)]
pub struct WorkflowOverrides {
    pub max_retries: Option<u32>,
    pub acceptance_threshold: Option<f32>,
    pub wall_clock_timeout: Option<Duration>,
}

impl WorkflowOverrides {
    /// Apply the overrides to a base workflow configuration
    pub fn apply(&self, base: &WorkflowConfig) -> WorkflowConfig {
        WorkflowConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            acceptance_threshold: self
                .acceptance_threshold
                .map(|t| t.clamp(0.0, 1.0))
                .unwrap_or(base.acceptance_threshold),
            wall_clock_timeout: self.wall_clock_timeout.unwrap_or(base.wall_clock_timeout),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            NoesisError::Configuration(format!("invalid value for {}: {}", name, raw))
        }),
        None => Ok(None),
    }
}

impl NoesisConfig {
    /// Build a configuration from defaults overridden by environment variables.
    ///
    /// Recognized variables: `ORACLE_MODEL`, `ORACLE_TEMPERATURE`,
    /// `ORACLE_MAX_TOKENS`, `WORKFLOW_MAX_RETRIES`,
    /// `WORKFLOW_ACCEPTANCE_THRESHOLD`, `WORKFLOW_WALL_CLOCK_TIMEOUT_SECONDS`,
    /// `KNOWLEDGE_STORE_URL`, `KNOWLEDGE_STORE_QUERY_PATH`,
    /// `WEB_API_KEY` (falling back to `TAVILY_API_KEY`),
    /// `RETRIEVAL_BACKEND_TIMEOUT_SECONDS`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is present but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(model) = env_var("ORACLE_MODEL") {
            config.oracle.model = model;
        }
        if let Some(temperature) = env_parse::<f32>("ORACLE_TEMPERATURE")? {
            config.oracle.temperature = temperature;
        }
        if let Some(max_tokens) = env_parse::<usize>("ORACLE_MAX_TOKENS")? {
            config.oracle.max_tokens = max_tokens;
        }
        if let Some(max_retries) = env_parse::<u32>("WORKFLOW_MAX_RETRIES")? {
            config.workflow.max_retries = max_retries;
        }
        if let Some(threshold) = env_parse::<f32>("WORKFLOW_ACCEPTANCE_THRESHOLD")? {
            config.workflow.acceptance_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("WORKFLOW_WALL_CLOCK_TIMEOUT_SECONDS")? {
            config.workflow.wall_clock_timeout = Duration::from_secs(secs);
        }
        if let Some(url) = env_var("KNOWLEDGE_STORE_URL") {
            config.retrieval.knowledge_store_url = Some(url);
        }
        if let Some(path) = env_var("KNOWLEDGE_STORE_QUERY_PATH") {
            config.retrieval.knowledge_store_query_path = path;
        }
        if let Some(key) = env_var("WEB_API_KEY").or_else(|| env_var("TAVILY_API_KEY")) {
            config.retrieval.web_api_key = Some(key);
        }
        if let Some(secs) = env_parse::<u64>("RETRIEVAL_BACKEND_TIMEOUT_SECONDS")? {
            config.retrieval.backend_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for out-of-range thresholds or empty
    /// budgets.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.oracle.temperature) {
            return Err(NoesisError::Configuration(format!(
                "oracle.temperature must be in [0, 1], got {}",
                self.oracle.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.workflow.acceptance_threshold) {
            return Err(NoesisError::Configuration(format!(
                "workflow.acceptance_threshold must be in [0, 1], got {}",
                self.workflow.acceptance_threshold
            )));
        }
        if self.oracle.max_tokens == 0 {
            return Err(NoesisError::Configuration(
                "oracle.max_tokens must be positive".to_string(),
            ));
        }
        if self.context.max_items == 0 || self.context.max_chars == 0 {
            return Err(NoesisError::Configuration(
                "context budgets must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
