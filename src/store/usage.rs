//! Token usage and cost accounting.
//!
//! Every provider call (completion or embedding) appends a `token_usage`
//! row. When the call belongs to a session, the `session_costs` rollup is
//! upserted in the same transaction.

use sqlx::SqlitePool;

use crate::errors::CoreResult;

/// One provider call's accounting record.
#[derive(Debug, Clone, Default)]
pub struct UsageRecord {
    /// Session this call belongs to, when known.
    pub session_id: Option<String>,
    /// Subsystem that made the call (e.g. `"router"`, `"embedder"`).
    pub source: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Provider name.
    pub provider: String,
    /// Prompt/input tokens reported by the provider.
    pub tokens_in: i64,
    /// Completion tokens reported by the provider.
    pub tokens_out: i64,
    /// Computed cost in USD.
    pub cost_usd: f64,
    /// Inferred task type, when routed.
    pub task_type: Option<String>,
    /// Free-form detail (first words of the prompt, etc.).
    pub task_detail: Option<String>,
    /// Wall-clock latency of the call.
    pub latency_ms: i64,
}

/// Aggregated cost for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCost {
    /// Session identifier.
    pub session_id: String,
    /// Total input tokens.
    pub tokens_in: i64,
    /// Total output tokens.
    pub tokens_out: i64,
    /// Total cost in USD.
    pub cost_usd: f64,
    /// Number of provider calls.
    pub request_count: i64,
}

/// Append a usage row and maintain the per-session rollup atomically.
///
/// # Errors
///
/// Returns a storage error when the transaction fails.
pub async fn record(pool: &SqlitePool, usage: &UsageRecord) -> CoreResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO token_usage (session_id, source, model, provider, tokens_in, \
         tokens_out, cost_usd, task_type, task_detail, latency_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&usage.session_id)
    .bind(&usage.source)
    .bind(&usage.model)
    .bind(&usage.provider)
    .bind(usage.tokens_in)
    .bind(usage.tokens_out)
    .bind(usage.cost_usd)
    .bind(&usage.task_type)
    .bind(&usage.task_detail)
    .bind(usage.latency_ms)
    .execute(&mut *tx)
    .await?;

    if let Some(session_id) = &usage.session_id {
        sqlx::query(
            "INSERT INTO session_costs (session_id, tokens_in, tokens_out, cost_usd, \
             request_count, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, datetime('now')) \
             ON CONFLICT(session_id) DO UPDATE SET \
             tokens_in = tokens_in + excluded.tokens_in, \
             tokens_out = tokens_out + excluded.tokens_out, \
             cost_usd = cost_usd + excluded.cost_usd, \
             request_count = request_count + 1, \
             updated_at = datetime('now')",
        )
        .bind(session_id)
        .bind(usage.tokens_in)
        .bind(usage.tokens_out)
        .bind(usage.cost_usd)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Fetch the rollup for a session, if any calls were recorded.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn session_cost(pool: &SqlitePool, session_id: &str) -> CoreResult<Option<SessionCost>> {
    let row: Option<(String, i64, i64, f64, i64)> = sqlx::query_as(
        "SELECT session_id, tokens_in, tokens_out, cost_usd, request_count \
         FROM session_costs WHERE session_id = ?1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(session_id, tokens_in, tokens_out, cost_usd, request_count)| SessionCost {
            session_id,
            tokens_in,
            tokens_out,
            cost_usd,
            request_count,
        },
    ))
}
