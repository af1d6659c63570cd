//! Provider-abstracted embedding client with cost accounting.
//!
//! The [`Embedder`] trait abstracts over embedding providers; the default
//! implementation [`OpenAiEmbedder`] calls an OpenAI-compatible
//! `/v1/embeddings` endpoint. Every successful call writes a usage row with
//! the provider-reported prompt tokens and computed cost. Rate-limited
//! requests are retried up to three times with exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credentials::CredentialService;
use crate::errors::{CoreError, CoreResult};
use crate::store::usage::{self, UsageRecord};
use crate::store::Storage;

/// Default embedding model (1536-dimensional).
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Per-request timeout for embedding calls.
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts before giving up on a rate-limited provider.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay between attempts.
const BACKOFF_BASE_MS: u64 = 250;

/// Expected vector width for a model identifier.
pub fn model_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        // text-embedding-3-small, ada-002, and anything unrecognised.
        _ => 1536,
    }
}

/// Call-site options for embedding generation.
#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    /// Session attributed in usage accounting.
    pub session_id: Option<String>,
    /// Subsystem making the call (e.g. `"recall"`, `"memory"`).
    pub source: Option<String>,
}

/// Core embedding generation interface.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for one text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingCredential`], [`CoreError::ProviderHttp`]
    /// or [`CoreError::Timeout`] on failure.
    async fn embed(&self, text: &str, opts: &EmbedOptions) -> CoreResult<Vec<f32>>;

    /// Generate embeddings for a batch of texts in one request.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Embedder::embed`].
    async fn embed_batch(&self, texts: &[String], opts: &EmbedOptions)
        -> CoreResult<Vec<Vec<f32>>>;

    /// Vector width produced by this embedder.
    fn dimensions(&self) -> usize;

    /// Model identifier used for storage and accounting.
    fn model(&self) -> &str;
}

/// OpenAI-compatible embedding provider.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    cost_per_mtok: f64,
    client: reqwest::Client,
    credentials: Arc<CredentialService>,
    storage: Storage,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Create an embedder for the default model.
    pub fn new(credentials: Arc<CredentialService>, storage: Storage) -> Self {
        Self::with_model(DEFAULT_EMBEDDING_MODEL, credentials, storage)
    }

    /// Create an embedder for a specific model.
    pub fn with_model(
        model: &str,
        credentials: Arc<CredentialService>,
        storage: Storage,
    ) -> Self {
        Self {
            model: model.to_owned(),
            dims: model_dimensions(model),
            base_url: "https://api.openai.com".to_owned(),
            cost_per_mtok: 0.02,
            client: reqwest::Client::new(),
            credentials,
            storage,
        }
    }

    /// Override the endpoint base URL (for tests and proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    async fn request(&self, inputs: &[String]) -> CoreResult<(Vec<Vec<f32>>, i64)> {
        let api_key = self.credentials.require("openai")?;
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(EMBEDDING_TIMEOUT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(CoreError::ProviderHttp {
                status: status.as_u16(),
                body: payload,
            });
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&payload)
            .map_err(|e| CoreError::Parse(format!("embedding response: {e}")))?;

        let mut vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != inputs.len() {
            return Err(CoreError::Parse(format!(
                "expected {} embeddings, provider returned {}",
                inputs.len(),
                vectors.len()
            )));
        }
        for vector in &mut vectors {
            if vector.len() != self.dims {
                return Err(CoreError::Parse(format!(
                    "embedding width {} does not match model dimension {}",
                    vector.len(),
                    self.dims
                )));
            }
        }

        Ok((vectors, parsed.usage.prompt_tokens))
    }

    /// Retry loop: rate-limited responses back off exponentially, anything
    /// else surfaces immediately.
    async fn request_with_retry(&self, inputs: &[String]) -> CoreResult<(Vec<Vec<f32>>, i64)> {
        let mut attempt: u32 = 1;
        loop {
            match self.request(inputs).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let backoff = BACKOFF_BASE_MS
                        .saturating_mul(1u64 << attempt.saturating_sub(1))
                        .saturating_add(rand::thread_rng().gen_range(0..100));
                    warn!(attempt, backoff_ms = backoff, error = %err, "embedding retry");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn record_usage(&self, tokens_in: i64, latency_ms: i64, opts: &EmbedOptions) {
        let record = UsageRecord {
            session_id: opts.session_id.clone(),
            source: opts.source.clone(),
            model: self.model.clone(),
            provider: "openai".to_owned(),
            tokens_in,
            tokens_out: 0,
            cost_usd: usage_cost(tokens_in, self.cost_per_mtok),
            task_type: Some("embedding".to_owned()),
            task_detail: None,
            latency_ms,
        };
        if let Err(err) = usage::record(self.storage.pool(), &record).await {
            warn!(error = %err, "failed to record embedding usage");
        }
    }
}

// Token counts stay far below 2^52, so the f64 conversion is exact.
#[allow(clippy::cast_precision_loss)]
fn usage_cost(tokens_in: i64, cost_per_mtok: f64) -> f64 {
    let tokens = if tokens_in < 0 { 0.0 } else { tokens_in as f64 };
    tokens * cost_per_mtok / 1_000_000.0
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, opts: &EmbedOptions) -> CoreResult<Vec<f32>> {
        let started = Instant::now();
        let input = vec![text.to_owned()];
        let (mut vectors, tokens_in) = self.request_with_retry(&input).await?;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.record_usage(tokens_in, latency_ms, opts).await;
        debug!(model = %self.model, tokens_in, latency_ms, "embedding generated");
        vectors
            .pop()
            .ok_or_else(|| CoreError::Parse("empty embeddings array".to_owned()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        opts: &EmbedOptions,
    ) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let (vectors, tokens_in) = self.request_with_retry(texts).await?;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.record_usage(tokens_in, latency_ms, opts).await;
        debug!(
            model = %self.model,
            batch = texts.len(),
            tokens_in,
            latency_ms,
            "embedding batch generated"
        );
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: EmbeddingUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    prompt_tokens: i64,
}
