//! Knowledge store backend
//!
//! Talks to a remote knowledge store over a small JSON protocol: POST
//! `{query, mode}` to the query endpoint, plus ingestion and status
//! endpoints for growing the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextItem;
use crate::error::{NoesisError, Result};
use crate::retrieval::{BackendError, RetrievalResult, SourceBackend, SourceKind};

/// Knowledge store retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeMode {
    /// Narrow neighborhood search for fact-seeking queries
    Local,
    /// Broad search for comparative or survey queries
    Global,
    /// Combined strategy, used when uncertain
    Hybrid,
}

impl KnowledgeMode {
    /// Wire label
    pub fn label(&self) -> &'static str {
        match self {
            KnowledgeMode::Local => "local",
            KnowledgeMode::Global => "global",
            KnowledgeMode::Hybrid => "hybrid",
        }
    }

    /// Choose a mode from lexical features of the query.
    ///
    /// Comparative and survey phrasing routes to `global`; short
    /// definitional interrogatives to `local`; everything else to `hybrid`.
    pub fn infer(query: &str) -> Self {
        let lowered = query.to_lowercase();

        const GLOBAL_TERMS: &[&str] = &[
            "compare",
            "vs",
            "versus",
            "differ",
            "relationship",
            "overview",
            "summary",
            "analyze",
        ];
        if GLOBAL_TERMS.iter().any(|term| lowered.contains(term)) {
            return KnowledgeMode::Global;
        }

        const LOCAL_TERMS: &[&str] = &["what is", "define", "definition", "meaning"];
        let is_short = lowered.split_whitespace().count() <= 8;
        if is_short && LOCAL_TERMS.iter().any(|term| lowered.contains(term)) {
            return KnowledgeMode::Local;
        }

        KnowledgeMode::Hybrid
    }
}

impl std::fmt::Display for KnowledgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    mode: &'a str,
}

#[derive(Deserialize)]
struct QueryReply {
    response: String,
    #[serde(default)]
    entities: Vec<EntityRef>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Entity references arrive either as bare strings or as objects with an id
#[derive(Deserialize)]
#[serde(untagged)]
enum EntityRef {
    Name(String),
    Object { id: String },
}

impl EntityRef {
    fn into_id(self) -> String {
        match self {
            EntityRef::Name(name) => name,
            EntityRef::Object { id } => id,
        }
    }
}

/// Receipt for a document insertion
#[derive(Debug, Clone, Deserialize)]
pub struct InsertReceipt {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub relationships: usize,
}

/// Knowledge store health and statistics
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeStoreStatus {
    #[serde(default)]
    pub total_documents: Option<u64>,
    #[serde(default)]
    pub total_entities: Option<u64>,
    #[serde(default)]
    pub total_relationships: Option<u64>,
}

/// HTTP client for a remote knowledge store
pub struct KnowledgeStoreBackend {
    client: reqwest::Client,
    base_url: String,
    query_path: String,
}

impl KnowledgeStoreBackend {
    /// Create a backend for the given base URL and query path
    pub fn new(base_url: impl Into<String>, query_path: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            query_path: query_path.into(),
        }
    }

    /// Get the query endpoint URL
    pub fn query_url(&self) -> String {
        format!("{}{}", self.base_url, self.query_path)
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<reqwest::Response, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else if e.is_connect() {
                    BackendError::Unavailable(format!("cannot reach {}: {}", url, e))
                } else {
                    BackendError::Protocol(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Protocol(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        Ok(response)
    }

    /// Index a new document into the knowledge store.
    ///
    /// # Errors
    ///
    /// Returns a knowledge store error when the store rejects the document
    /// or is unreachable.
    pub async fn insert_document(
        &self,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<InsertReceipt> {
        let body = serde_json::json!({ "text": text, "metadata": metadata });
        let response = self
            .post_json("/insert", &body)
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("document insert failed: {}", e)))?;

        response
            .json::<InsertReceipt>()
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("invalid insert reply: {}", e)))
    }

    /// Index a batch of documents in one call.
    ///
    /// Each document is a `{text, metadata}` pair.
    pub async fn insert_batch(&self, documents: &[serde_json::Value]) -> Result<usize> {
        #[derive(Deserialize)]
        struct BatchReply {
            #[serde(default)]
            documents_processed: Option<usize>,
        }

        let body = serde_json::json!({ "documents": documents });
        let response = self
            .post_json("/batch_insert", &body)
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("batch insert failed: {}", e)))?;

        let reply: BatchReply = response
            .json()
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("invalid batch reply: {}", e)))?;

        Ok(reply.documents_processed.unwrap_or(documents.len()))
    }

    /// Fetch store health and statistics.
    pub async fn status(&self) -> Result<KnowledgeStoreStatus> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("status check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(NoesisError::KnowledgeStore(format!(
                "status check returned {}",
                response.status()
            )));
        }

        response
            .json::<KnowledgeStoreStatus>()
            .await
            .map_err(|e| NoesisError::KnowledgeStore(format!("invalid status reply: {}", e)))
    }
}

#[async_trait]
impl SourceBackend for KnowledgeStoreBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::KnowledgeStore
    }

    async fn retrieve(
        &self,
        query: &str,
        mode: Option<KnowledgeMode>,
    ) -> std::result::Result<RetrievalResult, BackendError> {
        let mode = mode.unwrap_or_else(|| KnowledgeMode::infer(query));

        tracing::debug!("querying knowledge store in {} mode", mode);
        let request = QueryRequest {
            query,
            mode: mode.label(),
        };
        let response = self.post_json(&self.query_path, &request).await?;

        let reply: QueryReply = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(format!("invalid query reply: {}", e)))?;

        if reply.response.trim().is_empty() {
            return Ok(RetrievalResult::empty(SourceKind::KnowledgeStore)
                .with_metadata("mode", serde_json::Value::String(mode.label().into())));
        }

        let entities: Vec<String> = reply.entities.into_iter().map(EntityRef::into_id).collect();
        let source_id = entities
            .first()
            .cloned()
            .unwrap_or_else(|| "knowledge_store_response".to_string());

        let item = ContextItem::new(
            SourceKind::KnowledgeStore,
            source_id,
            reply.response,
            reply.confidence.unwrap_or(1.0),
        )
        .with_entities(entities)
        .with_mode(mode.label());

        let mut result = RetrievalResult::new(SourceKind::KnowledgeStore, vec![item])
            .with_metadata("mode", serde_json::Value::String(mode.label().into()));
        result.confidence = reply.confidence;
        Ok(result)
    }
}
