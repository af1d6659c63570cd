//! Error log and component health checks.
//!
//! Background jobs record failures here and continue with the next unit of
//! work; operator tooling reads both tables for diagnostics.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::errors::CoreResult;

/// A recorded error.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Row id.
    pub id: i64,
    /// Subsystem that failed.
    pub source: Option<String>,
    /// Error message.
    pub message: String,
    /// Structured context, when captured.
    pub context: Option<Value>,
    /// When the error was recorded.
    pub created_at: String,
}

/// Append an error record.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn record_error(
    pool: &SqlitePool,
    source: &str,
    message: &str,
    context: Option<&Value>,
) -> CoreResult<i64> {
    let result = sqlx::query("INSERT INTO error_log (source, message, context) VALUES (?1, ?2, ?3)")
        .bind(source)
        .bind(message)
        .bind(context.map(Value::to_string))
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent errors, newest first.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn recent_errors(pool: &SqlitePool, limit: usize) -> CoreResult<Vec<ErrorRecord>> {
    let rows: Vec<(i64, Option<String>, String, Option<String>, String)> = sqlx::query_as(
        "SELECT id, source, message, context, created_at FROM error_log \
         ORDER BY id DESC LIMIT ?1",
    )
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, source, message, context, created_at)| ErrorRecord {
            id,
            source,
            message,
            context: context.and_then(|c| serde_json::from_str(&c).ok()),
            created_at,
        })
        .collect())
}

/// Record a component health snapshot.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn record_health(
    pool: &SqlitePool,
    component: &str,
    status: &str,
    detail: Option<&str>,
) -> CoreResult<()> {
    sqlx::query("INSERT INTO health_checks (component, status, detail) VALUES (?1, ?2, ?3)")
        .bind(component)
        .bind(status)
        .bind(detail)
        .execute(pool)
        .await?;
    Ok(())
}

/// Latest recorded status for a component, if any.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn latest_health(
    pool: &SqlitePool,
    component: &str,
) -> CoreResult<Option<(String, Option<String>)>> {
    let row: Option<(String, Option<String>)> = sqlx::query_as(
        "SELECT status, detail FROM health_checks WHERE component = ?1 \
         ORDER BY id DESC LIMIT 1",
    )
    .bind(component)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
