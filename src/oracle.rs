//! Typed oracle operations over an LLM provider
//!
//! Each workflow decision is backed by a distinct system prompt that demands
//! a strictly parseable JSON reply. Free-text interpretation is deliberately
//! avoided: a reply that cannot be parsed is an `OracleParse` error, and the
//! engine falls back to its conservative defaults.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OracleConfig;
use crate::context::CompiledContext;
use crate::error::{NoesisError, Result};
use crate::grading::RawGrade;
use crate::llm::{with_retry, LLMProvider, LLMRequest, RetryConfig};
use crate::parsing;
use crate::retrieval::SourceKind;

const REWRITE_PROMPT: &str = "\
You are a query rewriting assistant. Identify the core intent of the \
question, clarify ambiguous terms, expand abbreviations, and make the query \
specific and searchable. When enhancement hints are provided, incorporate \
them. Reply with ONLY a JSON object: \
{\"rewritten_query\": \"<improved query>\", \"reasoning\": \"<short explanation>\"}";

const NEEDS_INFO_PROMPT: &str = "\
You decide whether a query needs supporting information retrieved before it \
can be answered well. Reply with ONLY a JSON object: \
{\"decision\": \"YES\" | \"NO\", \"reason\": \"<short justification>\"}";

const CHOOSE_SOURCE_PROMPT: &str = "\
You select the single best data source for a query. Options: \
knowledge_store (stored documents, historical and domain facts), \
web (recent events, current news), \
tool_api (real-time data, calculations, specific operations). \
Reply with ONLY a JSON object: {\"source\": \"<one of the three tags>\"}";

const ANSWER_PROMPT: &str = "\
You are an expert assistant. Answer directly and concisely using ONLY the \
provided context. If the context is insufficient, say so. Cite sources by \
their identifiers where possible. Do not speculate.";

const GRADE_PROMPT: &str = "\
You are a quality assurance agent. Grade the generated answer on four \
criteria, each 0.0 to 1.0: relevancy (does it address the query), \
faithfulness (no claims beyond the context), context_quality (was the \
retrieved context sufficient and on-topic), coherence (structure and \
clarity). Reply with ONLY a JSON object: \
{\"relevancy\": <f>, \"faithfulness\": <f>, \"context_quality\": <f>, \
\"coherence\": <f>, \"improvement_reason\": \"<what to fix, empty if nothing>\"}";

/// Outcome of the retrieval-need decision
#[derive(Debug, Clone)]
pub struct RetrievalNeed {
    pub needs_more: bool,
    pub reason: String,
}

/// Typed operations against the LLM
pub struct Oracle {
    provider: Arc<dyn LLMProvider>,
    config: OracleConfig,
    retry: RetryConfig,
}

impl Oracle {
    /// Create an oracle over the given provider
    pub fn new(provider: Arc<dyn LLMProvider>, config: OracleConfig) -> Self {
        Self {
            provider,
            config,
            retry: RetryConfig::default(),
        }
    }

    /// Override the transport retry policy
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Issue one prompt, retrying transport failures with backoff
    async fn call(&self, system_prompt: &str, user_prompt: String) -> Result<String> {
        let request = LLMRequest::with_system_prompt(system_prompt, user_prompt)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens);

        let response = with_retry(&self.retry, || async {
            tokio::time::timeout(
                self.config.call_timeout,
                self.provider.generate_request(&request),
            )
            .await
            .map_err(|_| {
                NoesisError::OracleTransport(format!(
                    "oracle call timed out after {:?}",
                    self.config.call_timeout
                ))
            })?
        })
        .await?;

        Ok(response.content)
    }

    /// Rewrite a query for retrieval, optionally folding in loopback hints.
    pub async fn rewrite(&self, query: &str, hints: &[String]) -> Result<String> {
        #[derive(Deserialize)]
        struct RewriteReply {
            rewritten_query: String,
        }

        let mut user_prompt = format!("Original query: {}", query);
        if !hints.is_empty() {
            user_prompt.push_str("\n\nEnhancement hints from earlier attempts:");
            for hint in hints {
                user_prompt.push_str(&format!("\n- {}", hint));
            }
        }

        let content = self.call(REWRITE_PROMPT, user_prompt).await?;
        let reply: RewriteReply = parsing::extract_typed(&content).ok_or_else(|| {
            NoesisError::OracleParse(format!("unparseable rewrite reply: {}", truncate(&content)))
        })?;

        if reply.rewritten_query.trim().is_empty() {
            return Err(NoesisError::OracleParse(
                "rewrite reply contained an empty query".to_string(),
            ));
        }
        Ok(reply.rewritten_query)
    }

    /// Decide whether the query needs retrieved information.
    pub async fn needs_more_information(&self, query: &str) -> Result<RetrievalNeed> {
        #[derive(Deserialize)]
        struct DecisionReply {
            decision: String,
            #[serde(default)]
            reason: String,
        }

        let content = self
            .call(NEEDS_INFO_PROMPT, format!("Query: {}", query))
            .await?;
        let reply: DecisionReply = parsing::extract_typed(&content).ok_or_else(|| {
            NoesisError::OracleParse(format!("unparseable decision reply: {}", truncate(&content)))
        })?;

        let needs_more = match reply.decision.trim().to_uppercase().as_str() {
            "YES" => true,
            "NO" => false,
            other => {
                return Err(NoesisError::OracleParse(format!(
                    "decision must be YES or NO, got {:?}",
                    other
                )))
            }
        };

        Ok(RetrievalNeed {
            needs_more,
            reason: reply.reason,
        })
    }

    /// Choose the retrieval source for a query.
    ///
    /// An unknown tag does not fail the workflow: it falls back to the
    /// knowledge store, the hybrid-defaulting source.
    pub async fn choose_source(&self, query: &str) -> Result<SourceKind> {
        #[derive(Deserialize)]
        struct SourceReply {
            source: String,
        }

        let content = self
            .call(CHOOSE_SOURCE_PROMPT, format!("Query: {}", query))
            .await?;
        let reply: SourceReply = parsing::extract_typed(&content).ok_or_else(|| {
            NoesisError::OracleParse(format!("unparseable source reply: {}", truncate(&content)))
        })?;

        Ok(SourceKind::parse(&reply.source).unwrap_or_else(|| {
            tracing::warn!(
                "unknown source tag {:?}, defaulting to knowledge store",
                reply.source
            );
            SourceKind::KnowledgeStore
        }))
    }

    /// Generate an answer grounded in the compiled context.
    pub async fn answer(&self, query: &str, context: &CompiledContext) -> Result<String> {
        let user_prompt = format!(
            "CONTEXT:\n{}\nUSER QUESTION:\n{}\n\nGenerate your answer now.",
            context.as_prompt_block(),
            query
        );

        let content = self.call(ANSWER_PROMPT, user_prompt).await?;
        Ok(content.trim().to_string())
    }

    /// Grade an answer; returns the raw axis scores for the grader to derive
    /// the full rubric result.
    pub async fn grade(
        &self,
        query: &str,
        context: &CompiledContext,
        answer: &str,
    ) -> Result<RawGrade> {
        let user_prompt = format!(
            "QUERY:\n{}\n\nCONTEXT PROVIDED:\n{}\nGENERATED ANSWER:\n{}",
            query,
            context.as_prompt_block(),
            answer
        );

        let content = self.call(GRADE_PROMPT, user_prompt).await?;
        parsing::extract_typed(&content).ok_or_else(|| {
            NoesisError::OracleParse(format!("unparseable grade reply: {}", truncate(&content)))
        })
    }

    /// The configured per-call timeout
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }
}

fn truncate(content: &str) -> String {
    const LIMIT: usize = 120;
    if content.chars().count() <= LIMIT {
        content.to_string()
    } else {
        let prefix: String = content.chars().take(LIMIT).collect();
        format!("{}...", prefix)
    }
}
