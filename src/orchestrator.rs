//! Public entry point
//!
//! Wires the oracle, retrieval backends, context compiler, and session
//! store into a workflow engine. Adapters are injected at construction;
//! the orchestrator holds no global state and its methods take `&self`, so
//! runs may execute concurrently over the shared, stateless collaborators.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{NoesisConfig, WorkflowOverrides};
use crate::context::ContextCompiler;
use crate::error::{NoesisError, Result};
use crate::llm::{LLMProvider, OpenAIProvider, RetryConfig};
use crate::oracle::Oracle;
use crate::retrieval::{
    KnowledgeStoreBackend, Retriever, SourceBackend, ToolApiBackend, ToolRegistry,
    WebSearchBackend,
};
use crate::session::SessionStore;
use crate::workflow::{FinalResponse, WorkflowEngine};

/// Per-call options for [`Orchestrator::process_query_with`]
#[derive(Debug, Default)]
pub struct ProcessOptions {
    /// Workflow parameter overrides for this call
    pub overrides: WorkflowOverrides,

    /// Cancellation token; a fresh token is used when absent
    pub cancel: Option<CancellationToken>,

    /// Pre-allocated query id, so observers can subscribe before the run
    pub query_id: Option<Uuid>,
}

/// The agentic RAG orchestrator
pub struct Orchestrator {
    engine: WorkflowEngine,
    store: SessionStore,
    config: NoesisConfig,
}

impl Orchestrator {
    /// Create an orchestrator builder
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build from environment configuration with an OpenAI-compatible
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when required variables are missing.
    pub fn from_env() -> Result<Self> {
        let config = NoesisConfig::from_env()?;
        let provider = OpenAIProvider::from_env(config.oracle.model.clone())?;
        Self::builder()
            .config(config)
            .provider(Arc::new(provider))
            .build()
    }

    /// The session store; subscribe here to observe run snapshots
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The effective configuration
    pub fn config(&self) -> &NoesisConfig {
        &self.config
    }

    /// Process a query through the full workflow.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::process_query_with`].
    pub async fn process_query(&self, original_text: &str) -> Result<FinalResponse> {
        self.process_query_with(original_text, ProcessOptions::default())
            .await
    }

    /// Process a query with per-call options.
    ///
    /// # Errors
    ///
    /// - [`NoesisError::WorkflowCancelled`] on cancellation or wall-clock
    ///   timeout without a candidate answer
    /// - [`NoesisError::WorkflowExhausted`] when no gradable answer was ever
    ///   produced
    pub async fn process_query_with(
        &self,
        original_text: &str,
        options: ProcessOptions,
    ) -> Result<FinalResponse> {
        let query_id = options.query_id.unwrap_or_else(Uuid::new_v4);
        let cancel = options.cancel.unwrap_or_default();
        let workflow_config = options.overrides.apply(&self.config.workflow);

        tracing::info!(%query_id, "processing query");
        self.engine
            .run(query_id, original_text, workflow_config, cancel)
            .await
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: NoesisConfig,
    provider: Option<Arc<dyn LLMProvider>>,
    knowledge: Option<Arc<dyn SourceBackend>>,
    web: Option<Arc<dyn SourceBackend>>,
    tool: Option<Arc<dyn SourceBackend>>,
    store: Option<SessionStore>,
    oracle_retry: Option<RetryConfig>,
}

impl OrchestratorBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: NoesisConfig::default(),
            provider: None,
            knowledge: None,
            web: None,
            tool: None,
            store: None,
            oracle_retry: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: NoesisConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the LLM provider (required)
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Install a knowledge store backend, replacing the one built from
    /// configuration
    pub fn knowledge_backend(mut self, backend: Arc<dyn SourceBackend>) -> Self {
        self.knowledge = Some(backend);
        self
    }

    /// Install a web search backend, replacing the one built from
    /// configuration
    pub fn web_backend(mut self, backend: Arc<dyn SourceBackend>) -> Self {
        self.web = Some(backend);
        self
    }

    /// Install a tool backend
    pub fn tool_backend(mut self, backend: Arc<dyn SourceBackend>) -> Self {
        self.tool = Some(backend);
        self
    }

    /// Install a tool registry as the tool backend
    pub fn tools(self, registry: ToolRegistry) -> Self {
        self.tool_backend(Arc::new(ToolApiBackend::new(registry)))
    }

    /// Share an existing session store
    pub fn store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the oracle transport retry policy
    pub fn oracle_retry(mut self, retry: RetryConfig) -> Self {
        self.oracle_retry = Some(retry);
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no provider is set, when the
    /// configuration fails validation, or when no retrieval backend is
    /// available at all.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let provider = self.provider.ok_or_else(|| {
            NoesisError::Configuration("an LLM provider is required".to_string())
        })?;

        let knowledge = self.knowledge.or_else(|| {
            self.config.retrieval.knowledge_store_url.as_ref().map(|url| {
                Arc::new(KnowledgeStoreBackend::new(
                    url.clone(),
                    self.config.retrieval.knowledge_store_query_path.clone(),
                )) as Arc<dyn SourceBackend>
            })
        });

        let web = self.web.or_else(|| {
            self.config.retrieval.web_api_key.as_ref().map(|key| {
                Arc::new(WebSearchBackend::new(
                    key.clone(),
                    self.config.retrieval.web_top_k,
                )) as Arc<dyn SourceBackend>
            })
        });

        let mut retriever = Retriever::new(self.config.retrieval.backend_timeout);
        for backend in [knowledge, web, self.tool].into_iter().flatten() {
            retriever = retriever.with_backend(backend);
        }

        if !retriever.has_backends() {
            return Err(NoesisError::Configuration(
                "no retrieval backend available; set retrieval.knowledge_store_url \
                 or install a backend"
                    .to_string(),
            ));
        }

        let mut oracle = Oracle::new(provider, self.config.oracle.clone());
        if let Some(retry) = self.oracle_retry {
            oracle = oracle.with_retry_config(retry);
        }

        let store = self.store.unwrap_or_default();
        let engine = WorkflowEngine::new(
            Arc::new(oracle),
            Arc::new(retriever),
            ContextCompiler::new(self.config.context.clone()),
            store.clone(),
        );

        Ok(Orchestrator {
            engine,
            store,
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
