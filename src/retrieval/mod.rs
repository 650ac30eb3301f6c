//! Retrieval backends
//!
//! One abstract operation over three source kinds. Backends are selected by
//! a closed tagged union, never by downcasting, and the [`Retriever`] façade
//! guarantees that no backend failure escapes: errors are folded into an
//! empty [`RetrievalResult`] with the failure recorded in `raw_metadata`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::context::ContextItem;

mod knowledge;
mod tool;
mod web;

pub use knowledge::{
    InsertReceipt, KnowledgeMode, KnowledgeStoreBackend, KnowledgeStoreStatus,
};
pub use tool::{ToolApiBackend, ToolCallable, ToolRegistry};
pub use web::WebSearchBackend;

/// The three categories of retrieval source
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    KnowledgeStore,
    Web,
    ToolApi,
}

impl SourceKind {
    /// Ranking priority at equal score; lower sorts first
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::KnowledgeStore => 0,
            SourceKind::ToolApi => 1,
            SourceKind::Web => 2,
        }
    }

    /// Wire label for prompts and metadata
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::KnowledgeStore => "knowledge_store",
            SourceKind::Web => "web",
            SourceKind::ToolApi => "tool_api",
        }
    }

    /// Parse a wire label, case-insensitively
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "knowledge_store" => Some(SourceKind::KnowledgeStore),
            "web" => Some(SourceKind::Web),
            "tool_api" => Some(SourceKind::ToolApi),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend-local error kinds. These never cross the [`Retriever`] boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend timed out")]
    Timeout,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    fn kind_label(&self) -> &'static str {
        match self {
            BackendError::Timeout => "timeout",
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Protocol(_) => "protocol",
        }
    }
}

/// Result of one backend invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Which backend produced this result
    pub source_kind: SourceKind,

    /// Retrieved evidence, best first as returned by the backend
    pub items: Vec<ContextItem>,

    /// Opaque backend metadata; carries the error record on failure
    pub raw_metadata: serde_json::Map<String, serde_json::Value>,

    /// Backend-reported confidence, when available
    pub confidence: Option<f32>,
}

impl RetrievalResult {
    /// Create a successful result
    pub fn new(source_kind: SourceKind, items: Vec<ContextItem>) -> Self {
        Self {
            source_kind,
            items,
            raw_metadata: serde_json::Map::new(),
            confidence: None,
        }
    }

    /// Create an empty result
    pub fn empty(source_kind: SourceKind) -> Self {
        Self::new(source_kind, Vec::new())
    }

    /// Create an empty result carrying a failure record
    pub fn failure(source_kind: SourceKind, error: &BackendError) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(error.to_string()),
        );
        metadata.insert(
            "error_kind".to_string(),
            serde_json::Value::String(error.kind_label().to_string()),
        );
        Self {
            source_kind,
            items: Vec::new(),
            raw_metadata: metadata,
            confidence: None,
        }
    }

    /// Whether this result records a backend failure
    pub fn is_failure(&self) -> bool {
        self.raw_metadata.contains_key("error")
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.raw_metadata.insert(key.into(), value);
        self
    }
}

/// A single retrieval source behind the façade
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// The kind this backend serves
    fn kind(&self) -> SourceKind;

    /// Retrieve evidence for a query.
    ///
    /// `mode` is only meaningful for the knowledge store; other backends
    /// ignore it.
    async fn retrieve(
        &self,
        query: &str,
        mode: Option<KnowledgeMode>,
    ) -> std::result::Result<RetrievalResult, BackendError>;
}

/// Façade dispatching retrieval by [`SourceKind`]
pub struct Retriever {
    knowledge: Option<Arc<dyn SourceBackend>>,
    web: Option<Arc<dyn SourceBackend>>,
    tool: Option<Arc<dyn SourceBackend>>,
    timeout: Duration,
}

impl Retriever {
    /// Create an empty retriever with the given per-call timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            knowledge: None,
            web: None,
            tool: None,
            timeout,
        }
    }

    /// Install a backend for its declared kind
    pub fn with_backend(mut self, backend: Arc<dyn SourceBackend>) -> Self {
        match backend.kind() {
            SourceKind::KnowledgeStore => self.knowledge = Some(backend),
            SourceKind::Web => self.web = Some(backend),
            SourceKind::ToolApi => self.tool = Some(backend),
        }
        self
    }

    /// Whether any backend is installed
    pub fn has_backends(&self) -> bool {
        self.knowledge.is_some() || self.web.is_some() || self.tool.is_some()
    }

    /// Whether a backend is installed for the given kind
    pub fn supports(&self, kind: SourceKind) -> bool {
        self.backend_for(kind).is_some()
    }

    fn backend_for(&self, kind: SourceKind) -> Option<&Arc<dyn SourceBackend>> {
        match kind {
            SourceKind::KnowledgeStore => self.knowledge.as_ref(),
            SourceKind::Web => self.web.as_ref(),
            SourceKind::ToolApi => self.tool.as_ref(),
        }
    }

    /// Retrieve from the backend for `kind`.
    ///
    /// Never fails: timeouts, missing backends, and protocol errors all come
    /// back as an empty result with the error recorded in `raw_metadata`.
    pub async fn retrieve(
        &self,
        query: &str,
        kind: SourceKind,
        mode: Option<KnowledgeMode>,
    ) -> RetrievalResult {
        let backend = match self.backend_for(kind) {
            Some(backend) => backend,
            None => {
                let error =
                    BackendError::Unavailable(format!("no backend configured for {}", kind));
                tracing::warn!("retrieval skipped: {}", error);
                return RetrievalResult::failure(kind, &error);
            }
        };

        let outcome = tokio::time::timeout(self.timeout, backend.retrieve(query, mode)).await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                tracing::warn!("retrieval from {} failed: {}", kind, error);
                RetrievalResult::failure(kind, &error)
            }
            Err(_) => {
                tracing::warn!("retrieval from {} timed out after {:?}", kind, self.timeout);
                RetrievalResult::failure(kind, &BackendError::Timeout)
            }
        }
    }
}
