//! Session recall: transcript RAG over past conversations.
//!
//! Pipeline: `transcript file → validate → chunk → contextualise → embed →
//! store`, driven incrementally by a hash-based change detector. Search is
//! hybrid: cosine similarity over embeddings fused with FTS5 keyword
//! ranking via RRF.

pub mod chunker;
pub mod context;
pub mod indexer;
pub mod metadata;
pub mod search;
pub mod transcript;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::activity::ActivityLog;
use crate::embedding::Embedder;
use crate::errors::CoreResult;
use crate::store::health as health_store;

use self::chunker::ChunkerConfig;
use self::context::ContextGenerator;
use self::indexer::RecallIndexer;
use self::search::RecallSearch;

/// Overall recall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Everything indexed cleanly.
    Ok,
    /// Failed chunks or quarantined sessions present.
    Degraded,
    /// The store is unreachable.
    Error,
}

impl HealthStatus {
    /// String form for persistence and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Error => "error",
        }
    }
}

/// Health snapshot of the recall subsystem.
#[derive(Debug, Clone)]
pub struct RecallHealth {
    /// Overall classification.
    pub status: HealthStatus,
    /// Indexed chunks.
    pub total_chunks: i64,
    /// Tracked session files.
    pub total_sessions: i64,
    /// Chunks whose contextualisation failed.
    pub failed_chunks: i64,
    /// Quarantined sessions.
    pub quarantined_sessions: i64,
    /// Mean per-session index time.
    pub avg_index_time_ms: f64,
    /// Mean search latency this process.
    pub avg_search_latency_ms: f64,
}

/// Per-session indexing status for operator tooling.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Session id.
    pub session_id: String,
    /// Chunks stored.
    pub chunk_count: i64,
    /// `complete`, `partial`, or `failed`.
    pub status: String,
    /// Last successful index time.
    pub last_indexed: Option<String>,
}

/// Facade over the indexer and search surfaces.
pub struct RecallEngine {
    pool: SqlitePool,
    indexer: RecallIndexer,
    search: RecallSearch,
}

impl std::fmt::Debug for RecallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallEngine").finish_non_exhaustive()
    }
}

impl RecallEngine {
    /// Assemble the engine from its collaborators.
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        context: Option<Arc<dyn ContextGenerator>>,
        activity: ActivityLog,
        config: ChunkerConfig,
    ) -> Self {
        let indexer = RecallIndexer::new(
            pool.clone(),
            Arc::clone(&embedder),
            context,
            activity,
            config,
        );
        let search = RecallSearch::new(pool.clone(), embedder);
        Self {
            pool,
            indexer,
            search,
        }
    }

    /// The indexing surface.
    pub fn indexer(&self) -> &RecallIndexer {
        &self.indexer
    }

    /// The search surface.
    pub fn search(&self) -> &RecallSearch {
        &self.search
    }

    /// Invalidate every stored file hash so the next run re-indexes the
    /// whole corpus (the `--all` operator hammer).
    ///
    /// # Errors
    ///
    /// Returns a storage error when the update fails.
    pub async fn mark_all_stale(&self) -> CoreResult<u64> {
        let result = sqlx::query("UPDATE session_files SET file_hash = '', status = 'partial'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Per-session indexing status, most recently indexed first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn status(&self) -> CoreResult<Vec<SessionStatus>> {
        let rows: Vec<(String, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT session_id, chunk_count, status, last_indexed FROM session_files \
             ORDER BY last_indexed DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(session_id, chunk_count, status, last_indexed)| SessionStatus {
                session_id,
                chunk_count,
                status,
                last_indexed,
            })
            .collect())
    }

    /// Health snapshot; also persisted to the health-check table.
    ///
    /// Storage failures degrade to [`HealthStatus::Error`] rather than
    /// propagating.
    pub async fn health(&self) -> RecallHealth {
        let counts: Result<(i64, i64, i64, i64, f64), sqlx::Error> = sqlx::query_as(
            "SELECT \
             (SELECT count(*) FROM session_chunks), \
             (SELECT count(*) FROM session_files), \
             (SELECT count(*) FROM session_chunks WHERE context_status = 'failed'), \
             (SELECT count(*) FROM session_files WHERE status = 'failed'), \
             (SELECT coalesce(avg(index_time_ms), 0.0) FROM session_files \
              WHERE status = 'complete')",
        )
        .fetch_one(&self.pool)
        .await;

        let health = match counts {
            Ok((total_chunks, total_sessions, failed_chunks, quarantined_sessions, avg_index)) => {
                let status = if failed_chunks > 0 || quarantined_sessions > 0 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Ok
                };
                RecallHealth {
                    status,
                    total_chunks,
                    total_sessions,
                    failed_chunks,
                    quarantined_sessions,
                    avg_index_time_ms: avg_index,
                    avg_search_latency_ms: self.search.average_latency_ms(),
                }
            }
            Err(_) => RecallHealth {
                status: HealthStatus::Error,
                total_chunks: 0,
                total_sessions: 0,
                failed_chunks: 0,
                quarantined_sessions: 0,
                avg_index_time_ms: 0.0,
                avg_search_latency_ms: self.search.average_latency_ms(),
            },
        };

        let detail = format!(
            "{} chunks / {} sessions, {} failed, {} quarantined",
            health.total_chunks,
            health.total_sessions,
            health.failed_chunks,
            health.quarantined_sessions
        );
        let _ = health_store::record_health(
            &self.pool,
            "recall",
            health.status.as_str(),
            Some(&detail),
        )
        .await;

        health
    }
}
