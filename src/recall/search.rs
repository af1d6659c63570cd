//! Vector, keyword, and hybrid search over session chunks.
//!
//! Vector search embeds the query and ranks stored vectors by cosine
//! similarity. Keyword search uses the `chunks_fts` FTS5 mirror. Hybrid
//! search fuses both rankings with Reciprocal Rank Fusion (`k = 60`) —
//! rank-based fusion is used because the two underlying scores are not on
//! the same scale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tracing::warn;

use crate::embedding::{EmbedOptions, Embedder};
use crate::errors::{CoreError, CoreResult};
use crate::store::{sanitise_match_query, vector};

use super::context::ContextStatus;

/// Reciprocal Rank Fusion constant (standard value).
const RRF_K: f64 = 60.0;

/// Default similarity threshold for vector search.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.4;

/// A stored chunk as returned by search.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    /// Row id.
    pub id: i64,
    /// Owning session.
    pub session_id: String,
    /// Position within the session.
    pub chunk_index: i64,
    /// Exchange timestamp.
    pub timestamp: Option<String>,
    /// Roles present.
    pub speakers: Vec<String>,
    /// Topic tags.
    pub topic_tags: Vec<String>,
    /// Decision markers present.
    pub has_decision: bool,
    /// Action markers present.
    pub has_action: bool,
    /// Original display text.
    pub content: String,
    /// LLM context prefix, when generated.
    pub context_prefix: Option<String>,
    /// Contextualisation state.
    pub context_status: ContextStatus,
    /// Estimated tokens.
    pub token_count: i64,
}

/// A vector-search hit.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    /// The matched chunk.
    pub chunk: ChunkRow,
    /// Cosine similarity against the query.
    pub similarity: f32,
}

/// A hybrid-search hit.
#[derive(Debug, Clone)]
pub struct HybridHit {
    /// The matched chunk.
    pub chunk: ChunkRow,
    /// Summed RRF score across the rankings the chunk appeared in.
    pub score: f64,
}

/// Optional metadata filters for chunk search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Only chunks timestamped at or after this instant.
    pub after: Option<String>,
    /// Only chunks timestamped at or before this instant.
    pub before: Option<String>,
    /// Require this role among the chunk's speakers.
    pub role: Option<String>,
    /// Require (or exclude) decision chunks.
    pub has_decision: Option<bool>,
    /// Require (or exclude) action chunks.
    pub has_action: Option<bool>,
    /// Require at least one of these topic tags.
    pub topic_tags: Vec<String>,
}

type ChunkTuple = (
    i64,
    String,
    i64,
    Option<String>,
    String,
    String,
    bool,
    bool,
    String,
    Option<String>,
    String,
    i64,
);

const CHUNK_COLUMNS: &str = "id, session_id, chunk_index, timestamp, speakers, topic_tags, \
                             has_decision, has_action, content, context_prefix, \
                             context_status, token_count";

/// Same columns qualified for joins against `chunks_fts` (which carries its
/// own `content` column).
const QUALIFIED_CHUNK_COLUMNS: &str =
    "s.id, s.session_id, s.chunk_index, s.timestamp, s.speakers, s.topic_tags, \
     s.has_decision, s.has_action, s.content, s.context_prefix, \
     s.context_status, s.token_count";

const FILTER_CLAUSE: &str = "(?1 IS NULL OR timestamp >= ?1) \
                             AND (?2 IS NULL OR timestamp <= ?2) \
                             AND (?3 IS NULL OR speakers LIKE '%' || ?3 || '%') \
                             AND (?4 IS NULL OR has_decision = ?4) \
                             AND (?5 IS NULL OR has_action = ?5)";

/// Search surface over indexed chunks.
#[derive(Clone)]
pub struct RecallSearch {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    latency_total_ms: Arc<AtomicU64>,
    latency_samples: Arc<AtomicU64>,
}

impl std::fmt::Debug for RecallSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallSearch").finish_non_exhaustive()
    }
}

impl RecallSearch {
    /// Create a search surface.
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            embedder,
            latency_total_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Process-local average search latency in milliseconds.
    // Millisecond totals and sample counts stay far below 2^52, so the f64
    // conversion is exact.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_latency_ms(&self) -> f64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.latency_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
    }

    /// Semantic search: embed the query and rank by cosine similarity.
    ///
    /// # Errors
    ///
    /// Returns embedding or storage errors.
    pub async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        filters: &SearchFilters,
    ) -> CoreResult<Vec<ChunkHit>> {
        let started = Instant::now();

        let opts = EmbedOptions {
            session_id: None,
            source: Some("recall".to_owned()),
        };
        let query_vector = self.embedder.embed(query, &opts).await?;

        let rows: Vec<(Vec<u8>, i64)> = sqlx::query_as(&format!(
            "SELECT embedding, id FROM session_chunks \
             WHERE embedding IS NOT NULL AND {FILTER_CLAUSE}"
        ))
        .bind(&filters.after)
        .bind(&filters.before)
        .bind(filters.role.as_ref().map(|r| format!("\"{r}\"")))
        .bind(filters.has_decision)
        .bind(filters.has_action)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(i64, f32)> = Vec::new();
        for (blob, id) in rows {
            let Ok(stored) = vector::unpack(&blob) else {
                warn!(chunk = id, "skipping malformed embedding blob");
                continue;
            };
            let similarity = vector::cosine_similarity(&query_vector, &stored);
            if similarity >= threshold {
                scored.push((id, similarity));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut hits = Vec::new();
        for (id, similarity) in scored {
            let chunk = self.fetch_chunk(id).await?;
            if !tag_filter_matches(&filters.topic_tags, &chunk.topic_tags) {
                continue;
            }
            hits.push(ChunkHit { chunk, similarity });
            if hits.len() >= limit {
                break;
            }
        }

        self.record_latency(started);
        Ok(hits)
    }

    /// Keyword search over the FTS5 mirror, best rank first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> CoreResult<Vec<ChunkRow>> {
        let started = Instant::now();

        let sanitised = sanitise_match_query(query);
        if sanitised.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ChunkTuple> = sqlx::query_as(&format!(
            "SELECT {QUALIFIED_CHUNK_COLUMNS} \
             FROM chunks_fts f \
             JOIN session_chunks s ON f.rowid = s.id \
             WHERE chunks_fts MATCH ?6 AND {FILTER_CLAUSE} \
             ORDER BY f.rank LIMIT ?7"
        ))
        .bind(&filters.after)
        .bind(&filters.before)
        .bind(filters.role.as_ref().map(|r| format!("\"{r}\"")))
        .bind(filters.has_decision)
        .bind(filters.has_action)
        .bind(&sanitised)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::new();
        for row in rows {
            let chunk = chunk_from_tuple(row)?;
            if tag_filter_matches(&filters.topic_tags, &chunk.topic_tags) {
                chunks.push(chunk);
            }
        }

        self.record_latency(started);
        Ok(chunks)
    }

    /// Hybrid search: Reciprocal Rank Fusion over the vector and keyword
    /// rankings, deduplicated, top `limit`.
    ///
    /// # Errors
    ///
    /// Returns embedding or storage errors.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> CoreResult<Vec<HybridHit>> {
        let fetch = limit.saturating_mul(4).max(20);

        let vector_hits = self
            .vector_search(query, fetch, DEFAULT_SIMILARITY_THRESHOLD, filters)
            .await?;
        let keyword_hits = self.keyword_search(query, fetch, filters).await?;

        let mut by_id: HashMap<i64, ChunkRow> = HashMap::new();
        let vector_ranking: Vec<i64> = vector_hits
            .into_iter()
            .map(|hit| {
                let id = hit.chunk.id;
                by_id.entry(id).or_insert(hit.chunk);
                id
            })
            .collect();
        let keyword_ranking: Vec<i64> = keyword_hits
            .into_iter()
            .map(|chunk| {
                let id = chunk.id;
                by_id.entry(id).or_insert(chunk);
                id
            })
            .collect();

        let mut scores: HashMap<i64, f64> = HashMap::new();
        for ranking in [&vector_ranking, &keyword_ranking] {
            for (rank, id) in ranking.iter().enumerate() {
                // Ranks are 1-based in the RRF formula.
                let rank = rank.saturating_add(1);
                // Ranks are bounded by the fetch depth, so the f64
                // conversion is exact.
                #[allow(clippy::cast_precision_loss)]
                let increment = 1.0 / (RRF_K + rank as f64);
                let entry = scores.entry(*id).or_insert(0.0);
                *entry += increment;
            }
        }

        let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        fused.truncate(limit);

        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| by_id.remove(&id).map(|chunk| HybridHit { chunk, score }))
            .collect())
    }

    async fn fetch_chunk(&self, id: i64) -> CoreResult<ChunkRow> {
        let row: Option<ChunkTuple> = sqlx::query_as(&format!(
            "SELECT {CHUNK_COLUMNS} FROM session_chunks WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(chunk_from_tuple)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("chunk {id}")))
    }

    fn record_latency(&self, started: Instant) {
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.latency_total_ms.fetch_add(elapsed, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }
}

fn tag_filter_matches(wanted: &[String], chunk_tags: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    wanted.iter().any(|tag| chunk_tags.contains(tag))
}

fn chunk_from_tuple(row: ChunkTuple) -> CoreResult<ChunkRow> {
    let (
        id,
        session_id,
        chunk_index,
        timestamp,
        speakers,
        topic_tags,
        has_decision,
        has_action,
        content,
        context_prefix,
        context_status,
        token_count,
    ) = row;
    Ok(ChunkRow {
        id,
        session_id,
        chunk_index,
        timestamp,
        speakers: serde_json::from_str(&speakers)
            .map_err(|e| CoreError::Parse(format!("chunk speakers: {e}")))?,
        topic_tags: serde_json::from_str(&topic_tags)
            .map_err(|e| CoreError::Parse(format!("chunk tags: {e}")))?,
        has_decision,
        has_action,
        content,
        context_prefix,
        context_status: ContextStatus::parse(&context_status)?,
        token_count,
    })
}
