//! Append-only activity stream: the primary audit trail.
//!
//! Every observable step in the runtime appends a row here. Rows are never
//! updated or deleted. The [`autolog`] submodule adds ambient-context
//! wrappers for tool instrumentation.

pub mod autolog;

use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::errors::{CoreError, CoreResult};

/// A typed reference to another entity, stored as `"<kind>:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedId {
    /// Entity kind (e.g. `"pipeline"`, `"task"`, `"memory"`).
    pub kind: String,
    /// Entity identifier.
    pub id: String,
}

impl RelatedId {
    /// Build a reference from a kind and a numeric id.
    pub fn new(kind: &str, id: i64) -> Self {
        Self {
            kind: kind.to_owned(),
            id: id.to_string(),
        }
    }

    /// Parse a stored `"<kind>:<id>"` string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] when the separator is missing.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| CoreError::Parse(format!("related id {s:?} is missing ':'")))?;
        if kind.is_empty() || id.is_empty() {
            return Err(CoreError::Parse(format!(
                "related id {s:?} must be '<kind>:<id>'"
            )));
        }
        Ok(Self {
            kind: kind.to_owned(),
            id: id.to_owned(),
        })
    }
}

impl std::fmt::Display for RelatedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A full activity record for [`ActivityLog::log_full`].
#[derive(Debug, Clone, Default)]
pub struct ActivityRecord {
    /// Machine-readable action name (e.g. `"pipeline_stage_changed"`).
    pub action: String,
    /// Grouping category (e.g. `"pipeline"`, `"recall"`).
    pub category: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Structured metadata serialised as JSON.
    pub metadata: Option<Value>,
    /// Session the event belongs to.
    pub session_id: Option<String>,
    /// Originating context (`"main"`, `"subagent"`, `"cron"`, ...).
    pub source: Option<String>,
    /// Typed reference to a related entity.
    pub related_id: Option<String>,
}

/// A stored activity row.
#[derive(Debug, Clone)]
pub struct ActivityRow {
    /// Row id.
    pub id: i64,
    /// Action name.
    pub action: String,
    /// Category, when set.
    pub category: Option<String>,
    /// Description, when set.
    pub description: Option<String>,
    /// Metadata JSON, when set.
    pub metadata: Option<Value>,
    /// Session id, when set.
    pub session_id: Option<String>,
    /// Source, when set.
    pub source: Option<String>,
    /// Related-entity reference, when set.
    pub related_id: Option<String>,
    /// Creation timestamp (UTC, `datetime('now')` format).
    pub created_at: String,
}

/// Filters for [`ActivityLog::get_recent`].
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Only rows from this source.
    pub source: Option<String>,
    /// Only rows referencing this entity.
    pub related_id: Option<String>,
}

/// Aggregation window for stats and digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Last 24 hours.
    Day,
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
}

impl Period {
    fn sql_modifier(self) -> &'static str {
        match self {
            Self::Day => "-1 day",
            Self::Week => "-7 days",
            Self::Month => "-30 days",
        }
    }
}

/// Per-category count for [`ActivityLog::get_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    /// Category name (`"(none)"` for uncategorised rows).
    pub category: String,
    /// Number of rows.
    pub count: i64,
}

/// One digest entry: a category with its activity envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    /// Category name.
    pub category: String,
    /// Number of rows in the period.
    pub count: i64,
    /// Earliest timestamp in the period.
    pub first_at: String,
    /// Latest timestamp in the period.
    pub last_at: String,
}

type ActivityTuple = (
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

const SELECT_COLUMNS: &str = "id, action, category, description, metadata, \
                              session_id, source, related_id, created_at";

/// Append-only writer and query surface over the `activity` table.
#[derive(Clone)]
pub struct ActivityLog {
    pool: SqlitePool,
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog").finish_non_exhaustive()
    }
}

impl ActivityLog {
    /// Create a log over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Simple append: action + description, optional category and context.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the insert fails.
    pub async fn log(
        &self,
        action: &str,
        description: &str,
        category: Option<&str>,
        source: Option<&str>,
        related_id: Option<&RelatedId>,
    ) -> CoreResult<i64> {
        self.log_full(ActivityRecord {
            action: action.to_owned(),
            category: category.map(str::to_owned),
            description: Some(description.to_owned()),
            source: source.map(str::to_owned),
            related_id: related_id.map(ToString::to_string),
            ..ActivityRecord::default()
        })
        .await
    }

    /// Full append with every field under caller control.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the insert fails.
    pub async fn log_full(&self, record: ActivityRecord) -> CoreResult<i64> {
        let mut tx = self.pool.begin().await?;
        let id = append_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Most recent rows, newest first, with optional source/related filters.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_recent(
        &self,
        limit: usize,
        filter: &ActivityFilter,
    ) -> CoreResult<Vec<ActivityRow>> {
        let rows: Vec<ActivityTuple> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM activity \
             WHERE (?1 IS NULL OR source = ?1) \
               AND (?2 IS NULL OR related_id = ?2) \
             ORDER BY id DESC LIMIT ?3",
        ))
        .bind(&filter.source)
        .bind(&filter.related_id)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_from_tuple).collect()
    }

    /// Rows in a category, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> CoreResult<Vec<ActivityRow>> {
        let rows: Vec<ActivityTuple> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM activity WHERE category = ?1 \
             ORDER BY id DESC LIMIT ?2",
        ))
        .bind(category)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_from_tuple).collect()
    }

    /// Rows with an action name, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_by_action(&self, action: &str, limit: usize) -> CoreResult<Vec<ActivityRow>> {
        let rows: Vec<ActivityTuple> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM activity WHERE action = ?1 \
             ORDER BY id DESC LIMIT ?2",
        ))
        .bind(action)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_from_tuple).collect()
    }

    /// Rows created inside `[since, until]` (ISO-8601 strings), oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_by_date(
        &self,
        since: &str,
        until: &str,
        limit: usize,
    ) -> CoreResult<Vec<ActivityRow>> {
        let rows: Vec<ActivityTuple> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM activity \
             WHERE created_at >= ?1 AND created_at <= ?2 \
             ORDER BY id ASC LIMIT ?3",
        ))
        .bind(since)
        .bind(until)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_from_tuple).collect()
    }

    /// Per-category counts over the period.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_stats(&self, period: Period) -> CoreResult<Vec<CategoryCount>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT category, count(*) FROM activity \
             WHERE created_at >= datetime('now', ?1) \
             GROUP BY category ORDER BY count(*) DESC",
        )
        .bind(period.sql_modifier())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category: category.unwrap_or_else(|| "(none)".to_owned()),
                count,
            })
            .collect())
    }

    /// Category digest over the period: counts plus first/last timestamps.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn get_digest(&self, period: Period, limit: usize) -> CoreResult<Vec<DigestEntry>> {
        let rows: Vec<(Option<String>, i64, String, String)> = sqlx::query_as(
            "SELECT category, count(*), min(created_at), max(created_at) FROM activity \
             WHERE created_at >= datetime('now', ?1) \
             GROUP BY category ORDER BY count(*) DESC LIMIT ?2",
        )
        .bind(period.sql_modifier())
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(category, count, first_at, last_at)| DigestEntry {
                category: category.unwrap_or_else(|| "(none)".to_owned()),
                count,
                first_at,
                last_at,
            })
            .collect())
    }
}

/// Append a record inside an existing transaction.
///
/// Used by subsystems whose writes must commit atomically with their
/// activity row (pipeline stage changes).
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn append_tx(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ActivityRecord,
) -> CoreResult<i64> {
    let metadata = record.metadata.as_ref().map(Value::to_string);
    let result = sqlx::query(
        "INSERT INTO activity (action, category, description, metadata, session_id, \
         source, related_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&record.action)
    .bind(&record.category)
    .bind(&record.description)
    .bind(&metadata)
    .bind(&record.session_id)
    .bind(&record.source)
    .bind(&record.related_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_from_tuple(row: ActivityTuple) -> CoreResult<ActivityRow> {
    let (id, action, category, description, metadata, session_id, source, related_id, created_at) =
        row;
    let metadata = metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| CoreError::Parse(format!("activity metadata: {e}")))?;
    Ok(ActivityRow {
        id,
        action,
        category,
        description,
        metadata,
        session_id,
        source,
        related_id,
        created_at,
    })
}
