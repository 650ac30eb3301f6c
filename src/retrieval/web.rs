//! Web search backend
//!
//! Issues a general web search against a JSON search API and maps the top-k
//! results to context items keyed by URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextItem;
use crate::retrieval::{BackendError, RetrievalResult, SourceBackend, SourceKind};

const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Web search client
pub struct WebSearchBackend {
    client: reqwest::Client,
    api_key: String,
    search_url: String,
    top_k: usize,
}

impl WebSearchBackend {
    /// Create a backend with the given API key and result count
    pub fn new(api_key: impl Into<String>, top_k: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            top_k: top_k.max(1),
        }
    }

    /// Override the search endpoint (for compatible self-hosted APIs)
    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    /// Get the configured result count
    pub fn top_k(&self) -> usize {
        self.top_k
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

#[async_trait]
impl SourceBackend for WebSearchBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn retrieve(
        &self,
        query: &str,
        _mode: Option<super::KnowledgeMode>,
    ) -> std::result::Result<RetrievalResult, BackendError> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.top_k,
        };

        let response = self
            .client
            .post(&self.search_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else if e.is_connect() {
                    BackendError::Unavailable(format!("cannot reach search API: {}", e))
                } else {
                    BackendError::Protocol(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Protocol(format!(
                "search API returned {}",
                response.status()
            )));
        }

        let reply: SearchReply = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(format!("invalid search reply: {}", e)))?;

        let items: Vec<ContextItem> = reply
            .results
            .into_iter()
            .take(self.top_k)
            .map(|hit| {
                let text = match hit.title {
                    Some(title) if !title.is_empty() => format!("{}: {}", title, hit.content),
                    _ => hit.content,
                };
                ContextItem::new(SourceKind::Web, hit.url, text, hit.score.unwrap_or(0.5))
            })
            .collect();

        Ok(RetrievalResult::new(SourceKind::Web, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_defaults() {
        let backend = WebSearchBackend::new("key", 5);
        assert_eq!(backend.top_k(), 5);
        assert_eq!(backend.kind(), SourceKind::Web);
    }

    #[test]
    fn test_top_k_floor() {
        let backend = WebSearchBackend::new("key", 0);
        assert_eq!(backend.top_k(), 1);
    }

    #[test]
    fn test_reply_parsing() {
        let reply: SearchReply = serde_json::from_str(
            r#"{"results": [
                {"url": "https://a", "content": "body", "title": "Title", "score": 0.8},
                {"url": "https://b", "content": "other"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(reply.results.len(), 2);
        assert_eq!(reply.results[0].score, Some(0.8));
        assert!(reply.results[1].title.is_none());
    }
}
