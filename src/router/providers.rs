//! Chat-completion provider adapters.
//!
//! Each provider exposes the same narrow surface: a name, a model, a cost
//! table, and `complete`. The router depends only on [`ChatProvider`];
//! everything provider-specific (endpoints, auth, response shapes) stays
//! here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::credentials::CredentialService;
use crate::errors::{CoreError, CoreResult};

/// Per-request timeout for completion calls.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// USD per million tokens, input and output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderCost {
    /// Input-token price.
    pub input: f64,
    /// Output-token price.
    pub output: f64,
}

/// A completion request as the router hands it to a provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Instruction text.
    pub prompt: String,
    /// Optional payload the instruction operates on.
    pub content: Option<String>,
    /// Whether the caller wants a streamed response (advisory).
    pub stream: bool,
}

impl CompletionRequest {
    /// Combined text sent to the provider.
    pub fn combined_text(&self) -> String {
        match &self.content {
            Some(content) if !content.is_empty() => format!("{}\n\n{}", self.prompt, content),
            _ => self.prompt.clone(),
        }
    }
}

/// A provider's completion result.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text.
    pub text: String,
    /// Prompt tokens reported by the provider.
    pub tokens_in: i64,
    /// Completion tokens reported by the provider.
    pub tokens_out: i64,
}

/// Uniform provider interface the router depends on.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name used in routing tables and usage rows.
    fn name(&self) -> &str;

    /// Model identifier sent upstream.
    fn model(&self) -> &str;

    /// Cost table for this model.
    fn cost(&self) -> ProviderCost;

    /// Request a completion.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProviderHttp`], [`CoreError::Timeout`] or
    /// [`CoreError::Parse`] on failure.
    async fn complete(&self, request: &CompletionRequest) -> CoreResult<CompletionResponse>;
}

/// Check an HTTP response, returning the body or a sanitised error.
///
/// # Errors
///
/// Returns [`CoreError::ProviderHttp`] on non-success status.
pub async fn check_http_response(response: reqwest::Response) -> CoreResult<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(CoreError::ProviderHttp {
            status: status.as_u16(),
            body: sanitize_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"AIza[A-Za-z0-9_\-]{30,}",
        r"Bearer [A-Za-z0-9._\-]{16,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    model: String,
    cost: ProviderCost,
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<CredentialService>,
}

impl GeminiProvider {
    /// Create the standard Gemini provider.
    pub fn new(credentials: Arc<CredentialService>) -> Self {
        Self {
            model: "gemini-2.0-flash".to_owned(),
            cost: ProviderCost {
                input: 0.10,
                output: 0.40,
            },
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// Override the endpoint base URL (for tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost(&self) -> ProviderCost {
        self.cost
    }

    async fn complete(&self, request: &CompletionRequest) -> CoreResult<CompletionResponse> {
        let api_key = self.credentials.require("gemini")?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": request.combined_text() }] }],
        });

        let response = self
            .client
            .post(&url)
            .timeout(COMPLETION_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let payload = check_http_response(response).await?;

        let parsed: Value = serde_json::from_str(&payload)
            .map_err(|e| CoreError::Parse(format!("gemini response: {e}")))?;

        let text = parsed
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .ok_or_else(|| CoreError::Parse("gemini response missing candidates".to_owned()))?;

        let tokens_in = parsed
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let tokens_out = parsed
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(CompletionResponse {
            text,
            tokens_in,
            tokens_out,
        })
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible (DeepSeek, OpenRouter)
// ---------------------------------------------------------------------------

/// Provider speaking the OpenAI `chat/completions` dialect.
///
/// DeepSeek and OpenRouter share this wire format; only the endpoint, the
/// credential name, and the cost table differ.
pub struct OpenAiCompatProvider {
    name: String,
    model: String,
    cost: ProviderCost,
    base_url: String,
    credential_name: String,
    client: reqwest::Client,
    credentials: Arc<CredentialService>,
}

impl OpenAiCompatProvider {
    /// The DeepSeek chat provider (cheap code tier).
    pub fn deepseek(credentials: Arc<CredentialService>) -> Self {
        Self {
            name: "deepseek".to_owned(),
            model: "deepseek-chat".to_owned(),
            cost: ProviderCost {
                input: 0.27,
                output: 1.10,
            },
            base_url: "https://api.deepseek.com".to_owned(),
            credential_name: "deepseek".to_owned(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// The OpenRouter aggregator provider.
    pub fn openrouter(credentials: Arc<CredentialService>) -> Self {
        Self {
            name: "openrouter".to_owned(),
            model: "openrouter/auto".to_owned(),
            cost: ProviderCost {
                input: 0.50,
                output: 1.50,
            },
            base_url: "https://openrouter.ai/api".to_owned(),
            credential_name: "openrouter".to_owned(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// Override the endpoint base URL (for tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost(&self) -> ProviderCost {
        self.cost
    }

    async fn complete(&self, request: &CompletionRequest) -> CoreResult<CompletionResponse> {
        let api_key = self.credentials.require(&self.credential_name)?;
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.combined_text() }],
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .timeout(COMPLETION_TIMEOUT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let payload = check_http_response(response).await?;

        let parsed: Value = serde_json::from_str(&payload)
            .map_err(|e| CoreError::Parse(format!("{} response: {e}", self.name)))?;

        let text = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                CoreError::Parse(format!("{} response missing choices", self.name))
            })?;

        let tokens_in = parsed
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let tokens_out = parsed
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(CompletionResponse {
            text,
            tokens_in,
            tokens_out,
        })
    }
}
