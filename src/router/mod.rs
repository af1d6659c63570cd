//! Model router: task-type inference, provider selection, fallback chains,
//! and per-call usage logging.
//!
//! The router owns a registry of [`ChatProvider`] implementations, a
//! task-type routing table, and per-provider fallback chains. A call walks
//! the chain until a provider succeeds; retryable failures (HTTP 429/503,
//! quota and rate-limit bodies, timeouts) fall through, anything else
//! surfaces immediately.

pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::credentials::CredentialService;
use crate::errors::{CoreError, CoreResult};
use crate::store::usage::{self, UsageRecord};

use self::providers::{ChatProvider, CompletionRequest, GeminiProvider, OpenAiCompatProvider};

/// Content length above which a typeless request is treated as summarise.
const SUMMARIZE_CONTENT_THRESHOLD: usize = 5000;

/// Task categories the routing table keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Condense long content.
    Summarize,
    /// Write code.
    Code,
    /// Diagnose a failure.
    Debug,
    /// Translate between languages.
    Translate,
    /// Restructure existing code.
    Refactor,
    /// Write or run tests.
    Test,
    /// Gather information.
    Research,
    /// Pull structure out of text.
    Extract,
    /// Anything else.
    Default,
}

impl TaskType {
    /// String form stored in usage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Code => "code",
            Self::Debug => "debug",
            Self::Translate => "translate",
            Self::Refactor => "refactor",
            Self::Test => "test",
            Self::Research => "research",
            Self::Extract => "extract",
            Self::Default => "default",
        }
    }

    /// Parse a stored string form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "summarize" => Ok(Self::Summarize),
            "code" => Ok(Self::Code),
            "debug" => Ok(Self::Debug),
            "translate" => Ok(Self::Translate),
            "refactor" => Ok(Self::Refactor),
            "test" => Ok(Self::Test),
            "research" => Ok(Self::Research),
            "extract" => Ok(Self::Extract),
            "default" => Ok(Self::Default),
            other => Err(CoreError::Validation(format!("unknown task type: {other}"))),
        }
    }
}

/// Infer a task type from the prompt and content.
///
/// Keyword heuristics run first; long content then implies summarisation and
/// a code fence implies code work.
pub fn infer_task_type(prompt: &str, content: Option<&str>) -> TaskType {
    let combined = match content {
        Some(c) => format!("{prompt} {c}").to_lowercase(),
        None => prompt.to_lowercase(),
    };

    const KEYWORDS: &[(&str, TaskType)] = &[
        ("summarize", TaskType::Summarize),
        ("code", TaskType::Code),
        ("debug", TaskType::Debug),
        ("translate", TaskType::Translate),
        ("refactor", TaskType::Refactor),
        ("test", TaskType::Test),
        ("research", TaskType::Research),
    ];
    for (keyword, task_type) in KEYWORDS {
        if combined.contains(keyword) {
            return *task_type;
        }
    }

    if let Some(content) = content {
        if content.chars().count() > SUMMARIZE_CONTENT_THRESHOLD {
            return TaskType::Summarize;
        }
        if content.contains("```") {
            return TaskType::Code;
        }
    }

    TaskType::Default
}

/// A routing request.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Explicit task type; inferred when absent.
    pub task_type: Option<TaskType>,
    /// Instruction text.
    pub prompt: String,
    /// Optional payload.
    pub content: Option<String>,
    /// Force a specific provider, bypassing the routing table.
    pub provider: Option<String>,
    /// Streaming hint passed through to the provider.
    pub stream: bool,
    /// Session attributed in usage accounting.
    pub session_id: Option<String>,
    /// Calling subsystem for usage accounting.
    pub source: Option<String>,
}

/// The routing decision, before (or without) execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Resolved task type.
    pub task_type: TaskType,
    /// Chosen primary provider.
    pub provider: String,
    /// Model the primary provider would use.
    pub model: String,
    /// Full provider chain (primary plus fallbacks).
    pub chain: Vec<String>,
}

/// The result of a routed completion.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Generated text.
    pub text: String,
    /// Provider that served the request (may be a fallback).
    pub provider: String,
    /// Model that served the request.
    pub model: String,
    /// Resolved task type.
    pub task_type: TaskType,
    /// Prompt tokens.
    pub tokens_in: i64,
    /// Completion tokens.
    pub tokens_out: i64,
    /// Computed cost in USD.
    pub cost_usd: f64,
    /// Wall-clock latency of the successful call.
    pub latency_ms: i64,
}

/// Task-type → provider router with fallback chains.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    routes: HashMap<TaskType, String>,
    fallbacks: HashMap<String, Vec<String>>,
    default_provider: String,
    pool: SqlitePool,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default", &self.default_provider)
            .finish_non_exhaustive()
    }
}

impl ModelRouter {
    /// Build an empty router; providers and routes are registered onto it.
    pub fn new(pool: SqlitePool, default_provider: &str) -> Self {
        Self {
            providers: HashMap::new(),
            routes: HashMap::new(),
            fallbacks: HashMap::new(),
            default_provider: default_provider.to_owned(),
            pool,
        }
    }

    /// Build the standard router: Gemini for summarise/research/extract/
    /// translate, DeepSeek for code/debug/refactor/test, each falling back
    /// to the other, OpenRouter available by name.
    pub fn standard(credentials: Arc<CredentialService>, pool: SqlitePool) -> Self {
        let mut router = Self::new(pool, "gemini");
        router.register(Arc::new(GeminiProvider::new(Arc::clone(&credentials))));
        router.register(Arc::new(OpenAiCompatProvider::deepseek(Arc::clone(
            &credentials,
        ))));
        router.register(Arc::new(OpenAiCompatProvider::openrouter(credentials)));

        for task_type in [
            TaskType::Summarize,
            TaskType::Research,
            TaskType::Extract,
            TaskType::Translate,
        ] {
            router.set_route(task_type, "gemini");
        }
        for task_type in [
            TaskType::Code,
            TaskType::Debug,
            TaskType::Refactor,
            TaskType::Test,
        ] {
            router.set_route(task_type, "deepseek");
        }

        router.set_fallbacks("gemini", &["deepseek"]);
        router.set_fallbacks("deepseek", &["gemini"]);
        router.set_fallbacks("openrouter", &["gemini"]);
        router
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    /// Route a task type to a provider name.
    pub fn set_route(&mut self, task_type: TaskType, provider: &str) {
        self.routes.insert(task_type, provider.to_owned());
    }

    /// Set the fallback chain tried after `provider` fails retryably.
    pub fn set_fallbacks(&mut self, provider: &str, fallbacks: &[&str]) {
        self.fallbacks.insert(
            provider.to_owned(),
            fallbacks.iter().map(|s| (*s).to_owned()).collect(),
        );
    }

    /// Resolve the decision for a request without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when the resolved provider is not
    /// registered.
    pub fn dry_run(&self, request: &RouteRequest) -> CoreResult<RouteDecision> {
        let task_type = request
            .task_type
            .unwrap_or_else(|| infer_task_type(&request.prompt, request.content.as_deref()));

        let provider_name = request
            .provider
            .clone()
            .or_else(|| self.routes.get(&task_type).cloned())
            .unwrap_or_else(|| self.default_provider.clone());

        let provider = self.providers.get(&provider_name).ok_or_else(|| {
            CoreError::Validation(format!("provider {provider_name:?} is not registered"))
        })?;

        let mut chain = vec![provider_name.clone()];
        if let Some(fallbacks) = self.fallbacks.get(&provider_name) {
            for name in fallbacks {
                if self.providers.contains_key(name) && !chain.contains(name) {
                    chain.push(name.clone());
                }
            }
        }

        Ok(RouteDecision {
            task_type,
            provider: provider_name,
            model: provider.model().to_owned(),
            chain,
        })
    }

    /// Route and execute a completion, walking the fallback chain.
    ///
    /// # Errors
    ///
    /// Surfaces the first non-retryable provider error immediately; when
    /// every provider in the chain fails retryably, the last error is
    /// returned.
    pub async fn route(&self, request: &RouteRequest) -> CoreResult<RouteOutcome> {
        let decision = self.dry_run(request)?;
        let completion = CompletionRequest {
            prompt: request.prompt.clone(),
            content: request.content.clone(),
            stream: request.stream,
        };

        let mut last_error: Option<CoreError> = None;

        for name in &decision.chain {
            let Some(provider) = self.providers.get(name) else {
                continue;
            };

            let started = Instant::now();
            match provider.complete(&completion).await {
                Ok(response) => {
                    let latency_ms =
                        i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    let cost = provider.cost();
                    let cost_usd = completion_cost(
                        response.tokens_in,
                        response.tokens_out,
                        cost.input,
                        cost.output,
                    );

                    self.record_usage(request, &decision, provider.as_ref(), &response, cost_usd, latency_ms)
                        .await;

                    debug!(
                        provider = %name,
                        task_type = decision.task_type.as_str(),
                        latency_ms,
                        "routed completion succeeded"
                    );

                    return Ok(RouteOutcome {
                        text: response.text,
                        provider: name.clone(),
                        model: provider.model().to_owned(),
                        task_type: decision.task_type,
                        tokens_in: response.tokens_in,
                        tokens_out: response.tokens_out,
                        cost_usd,
                        latency_ms,
                    });
                }
                Err(err) if err.is_retryable() => {
                    warn!(provider = %name, error = %err, "provider failed retryably, trying next");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CoreError::Validation("no providers available for request".to_owned())
        }))
    }

    async fn record_usage(
        &self,
        request: &RouteRequest,
        decision: &RouteDecision,
        provider: &dyn ChatProvider,
        response: &providers::CompletionResponse,
        cost_usd: f64,
        latency_ms: i64,
    ) {
        let detail: String = request.prompt.chars().take(80).collect();
        let record = UsageRecord {
            session_id: request.session_id.clone(),
            source: request.source.clone(),
            model: provider.model().to_owned(),
            provider: provider.name().to_owned(),
            tokens_in: response.tokens_in,
            tokens_out: response.tokens_out,
            cost_usd,
            task_type: Some(decision.task_type.as_str().to_owned()),
            task_detail: Some(detail),
            latency_ms,
        };
        if let Err(err) = usage::record(&self.pool, &record).await {
            warn!(error = %err, "failed to record completion usage");
        }
    }
}

// Token counts stay far below 2^52, so the f64 conversion is exact.
#[allow(clippy::cast_precision_loss)]
fn completion_cost(tokens_in: i64, tokens_out: i64, price_in: f64, price_out: f64) -> f64 {
    let tokens_in = if tokens_in < 0 { 0.0 } else { tokens_in as f64 };
    let tokens_out = if tokens_out < 0 { 0.0 } else { tokens_out as f64 };
    (tokens_in * price_in + tokens_out * price_out) / 1_000_000.0
}
