//! Contextual-retrieval prefixes for chunks.
//!
//! Each chunk gets a short LLM-generated prefix identifying participants,
//! topic, and time. The contextualised text (prefix + original) is what
//! gets embedded; the original text is preserved for display. A failed
//! generation marks the chunk `failed` and it is embedded without a prefix.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{CoreError, CoreResult};
use crate::router::{ModelRouter, RouteRequest, TaskType};

/// Characters of chunk text included in the contextualisation prompt.
const EXCERPT_CHARS: usize = 1500;

/// Contextualisation state of a stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// No prefix generated yet (or no generator configured).
    Pending,
    /// Prefix generated and embedded.
    Complete,
    /// Generation failed; chunk embedded without prefix.
    Failed,
}

impl ContextStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "invalid context status: {other:?}"
            ))),
        }
    }
}

/// Generates a short context prefix for a chunk.
#[async_trait]
pub trait ContextGenerator: Send + Sync {
    /// Produce a ~50-token prefix describing the excerpt.
    ///
    /// # Errors
    ///
    /// Returns provider errors; the indexer degrades to prefix-less
    /// embedding on failure.
    async fn context_prefix(
        &self,
        session_id: &str,
        timestamp: Option<&str>,
        chunk_text: &str,
    ) -> CoreResult<String>;
}

/// [`ContextGenerator`] backed by the model router.
pub struct RouterContextualizer {
    router: Arc<ModelRouter>,
}

impl RouterContextualizer {
    /// Wrap a router.
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ContextGenerator for RouterContextualizer {
    async fn context_prefix(
        &self,
        session_id: &str,
        timestamp: Option<&str>,
        chunk_text: &str,
    ) -> CoreResult<String> {
        let excerpt: String = chunk_text.chars().take(EXCERPT_CHARS).collect();
        let when = timestamp.unwrap_or("an unknown time");
        let prompt = format!(
            "Write one sentence (at most 50 tokens) of context for the conversation \
             excerpt below, naming the participants if determinable, the topic, and \
             the time. Output only the sentence.\n\n\
             Session: {session_id}\nTime: {when}"
        );

        let outcome = self
            .router
            .route(&RouteRequest {
                task_type: Some(TaskType::Summarize),
                prompt,
                content: Some(excerpt),
                session_id: Some(session_id.to_owned()),
                source: Some("recall".to_owned()),
                ..RouteRequest::default()
            })
            .await?;

        Ok(outcome.text.trim().to_owned())
    }
}
