//! Tool/API backend
//!
//! Wraps external callables behind the retrieval façade. A callable has a
//! single string-in, string-out contract; the registry routes each query to
//! the callable whose declared keywords match it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::ContextItem;
use crate::retrieval::{BackendError, RetrievalResult, SourceBackend, SourceKind};

/// An external callable exposed to the workflow
#[async_trait]
pub trait ToolCallable: Send + Sync {
    /// Tool name; used as the `source_id` of the produced context item
    fn name(&self) -> &str;

    /// Lexical routing keywords; a query containing any of them is routed
    /// to this tool
    fn keywords(&self) -> &[&str] {
        &[]
    }

    /// Invoke the tool
    async fn call(&self, input: &str) -> std::result::Result<String, BackendError>;
}

/// Registry of callables with lexical routing
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolCallable>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable
    pub fn register(&mut self, tool: Arc<dyn ToolCallable>) {
        self.tools.push(tool);
    }

    /// Whether the registry has no callables
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Pick the callable for a query: first keyword match wins, otherwise
    /// the first registered tool
    pub fn route(&self, query: &str) -> Option<&Arc<dyn ToolCallable>> {
        let lowered = query.to_lowercase();
        self.tools
            .iter()
            .find(|tool| {
                tool.keywords()
                    .iter()
                    .any(|keyword| lowered.contains(&keyword.to_lowercase()))
            })
            .or_else(|| self.tools.first())
    }
}

/// Backend adapter over a [`ToolRegistry`]
pub struct ToolApiBackend {
    registry: ToolRegistry,
}

impl ToolApiBackend {
    /// Create a backend over the given registry
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SourceBackend for ToolApiBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::ToolApi
    }

    async fn retrieve(
        &self,
        query: &str,
        _mode: Option<super::KnowledgeMode>,
    ) -> std::result::Result<RetrievalResult, BackendError> {
        let tool = self
            .registry
            .route(query)
            .ok_or_else(|| BackendError::Unavailable("no tools registered".to_string()))?;

        tracing::debug!("routing query to tool {}", tool.name());
        let output = tool.call(query).await?;

        let item = ContextItem::new(SourceKind::ToolApi, tool.name(), output, 1.0);
        Ok(
            RetrievalResult::new(SourceKind::ToolApi, vec![item]).with_metadata(
                "tool",
                serde_json::Value::String(tool.name().to_string()),
            ),
        )
    }
}
