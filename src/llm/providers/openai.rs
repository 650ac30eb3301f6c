//! OpenAI-compatible chat completions provider
//!
//! Speaks the `/chat/completions` protocol, which covers api.openai.com,
//! Azure deployments, and self-hosted gateways alike. Non-success statuses
//! are split in two: transient ones become transport errors so the oracle's
//! backoff can retry them, everything else (bad key, bad request) surfaces
//! as a configuration problem that no retry would fix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{NoesisError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, MessageRole, ModelInfo, TokenUsage};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Chat completions client for OpenAI-compatible endpoints
pub struct OpenAIProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAIProvider {
    /// Create a provider talking to api.openai.com
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::at(OPENAI_API_URL, api_key, model)
    }

    /// Create a provider against any compatible base URL, e.g. an Azure
    /// deployment or a local gateway
    pub fn at(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Create a provider from the environment: `OPENAI_API_KEY` (required)
    /// and `OPENAI_BASE_URL` (optional).
    ///
    /// # Errors
    ///
    /// Fails when `OPENAI_API_KEY` is absent.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| NoesisError::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_API_URL.to_string());

        Ok(Self::at(&base_url, api_key, model))
    }

    /// The model requests are issued for
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The full URL completions are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

/// Pull the human-readable message out of an OpenAI-style error body
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}

/// Statuses worth retrying at the transport layer
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let body = CompletionBody {
            model: &self.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NoesisError::OracleTransport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = api_error_message(&text).unwrap_or(text);

            return Err(if is_retryable_status(status.as_u16()) {
                NoesisError::OracleTransport(format!("{}: {}", status, detail))
            } else {
                NoesisError::Configuration(format!(
                    "API rejected request ({}): {}",
                    status, detail
                ))
            });
        }

        let reply: CompletionReply = response
            .json()
            .await
            .map_err(|e| NoesisError::OracleTransport(format!("malformed completion reply: {}", e)))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                NoesisError::OracleTransport("completion reply carried no content".to_string())
            })?;

        let usage = reply.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LLMResponse { content, usage })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}
