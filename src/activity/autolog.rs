//! Ambient-context auto-logging for tool invocations.
//!
//! A call site establishes a scope with [`with_context`]; every
//! [`log_tool`] call inside that scope inherits the scope's source and
//! related-id. The context is task-local, so concurrent sub-agent tasks
//! cannot pollute each other.
//!
//! Contract: nothing in this module ever surfaces an error. A failed log
//! write must not be able to break the tool it instruments.

use std::future::Future;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use super::{ActivityLog, ActivityRecord, RelatedId};

tokio::task_local! {
    static AUTOLOG: AutologContext;
}

/// Ambient logging context carried by the current task.
#[derive(Clone)]
pub struct AutologContext {
    log: ActivityLog,
    source: Option<String>,
    related_id: Option<String>,
}

impl std::fmt::Debug for AutologContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutologContext")
            .field("source", &self.source)
            .field("related_id", &self.related_id)
            .finish_non_exhaustive()
    }
}

/// Run `fut` with an ambient logging context installed.
///
/// All [`log_tool`] and [`wrap_async`] calls inside `fut` (and any futures
/// it awaits on the same task) inherit `source` and `related_id`.
pub async fn with_context<F>(
    log: ActivityLog,
    source: Option<&str>,
    related_id: Option<&RelatedId>,
    fut: F,
) -> F::Output
where
    F: Future,
{
    let context = AutologContext {
        log,
        source: source.map(str::to_owned),
        related_id: related_id.map(ToString::to_string),
    };
    AUTOLOG.scope(context, fut).await
}

/// Record a tool invocation with the ambient context.
///
/// Outside any context scope this is a no-op. Log failures are swallowed.
pub async fn log_tool(tool: &str, description: &str, metadata: Option<Value>) {
    let Ok(context) = AUTOLOG.try_with(Clone::clone) else {
        debug!(tool, "log_tool outside autolog scope, skipping");
        return;
    };

    let record = ActivityRecord {
        action: format!("tool_{tool}"),
        category: Some("tool".to_owned()),
        description: Some(description.to_owned()),
        metadata,
        session_id: None,
        source: context.source.clone(),
        related_id: context.related_id.clone(),
    };

    if let Err(err) = context.log.log_full(record).await {
        // Swallowed on purpose: observability must never break a tool.
        debug!(tool, error = %err, "auto-log write failed");
    }
}

/// Instrument a fallible async operation with start/end auto-logging.
///
/// Appends one activity row after the operation completes, carrying the
/// duration and success flag. The operation's result passes through
/// untouched; logging failures are swallowed.
pub async fn wrap_async<T, E, F>(tool: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = fut.await;
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
    let success = result.is_ok();

    log_tool(
        tool,
        &format!("{tool} finished in {duration_ms} ms"),
        Some(json!({ "duration_ms": duration_ms, "success": success })),
    )
    .await;

    result
}
