//! Knowledge cache: reusable facts with keyword and semantic search.
//!
//! Distinct from session recall — these are distilled, reusable summaries
//! rather than raw conversation. An FTS5 mirror (`knowledge_fts`) is kept
//! in sync by triggers; embeddings enable semantic lookup. Expired rows are
//! filtered from default queries but never deleted; superseded rows keep a
//! pointer to their replacement.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::warn;

use crate::embedding::{EmbedOptions, Embedder};
use crate::errors::{CoreError, CoreResult};
use crate::store::vector;

/// Where a knowledge entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnowledgeSource {
    /// Produced by a research task.
    Research,
    /// Extracted from a web page.
    Web,
    /// Distilled from a conversation.
    Conversation,
    /// Entered by the operator.
    Manual,
}

impl KnowledgeSource {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Web => "web",
            Self::Conversation => "conversation",
            Self::Manual => "manual",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "research" => Ok(Self::Research),
            "web" => Ok(Self::Web),
            "conversation" => Ok(Self::Conversation),
            "manual" => Ok(Self::Manual),
            other => Err(CoreError::Validation(format!(
                "invalid knowledge source: {other:?}"
            ))),
        }
    }
}

/// A knowledge cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    /// Row id (`None` before insert).
    pub id: Option<i64>,
    /// Short title.
    pub title: String,
    /// The reusable summary.
    pub summary: String,
    /// Origin.
    pub source_type: KnowledgeSource,
    /// Source URL, when applicable.
    pub source_url: Option<String>,
    /// Session the fact was distilled from.
    pub source_session: Option<String>,
    /// Topic tags.
    pub topic_tags: Vec<String>,
    /// Named entities mentioned.
    pub entities: Vec<String>,
    /// Confidence 0..1.
    pub confidence: f64,
    /// Importance 0..1 (participates in search weighting).
    pub importance: f64,
    /// Operator-verified flag.
    pub verified: bool,
    /// Replacement entry, when superseded.
    pub superseded_by: Option<i64>,
    /// Optional expiry.
    pub expires_at: Option<String>,
}

impl KnowledgeEntry {
    /// Convenience constructor with defaults.
    pub fn new(title: &str, summary: &str, source_type: KnowledgeSource) -> Self {
        Self {
            id: None,
            title: title.to_owned(),
            summary: summary.to_owned(),
            source_type,
            source_url: None,
            source_session: None,
            topic_tags: Vec::new(),
            entities: Vec::new(),
            confidence: 0.5,
            importance: 0.5,
            verified: false,
            superseded_by: None,
            expires_at: None,
        }
    }
}

/// Options for [`KnowledgeStore::search`].
#[derive(Debug, Clone)]
pub struct KnowledgeSearchOptions {
    /// Maximum results.
    pub limit: usize,
    /// Include rows past their expiry.
    pub include_expired: bool,
    /// Weight the FTS5 rank by `(1 + importance)`.
    pub weight_by_importance: bool,
}

impl Default for KnowledgeSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            include_expired: false,
            weight_by_importance: false,
        }
    }
}

/// Corpus statistics for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeStats {
    /// All rows.
    pub total: i64,
    /// Verified rows.
    pub verified: i64,
    /// Rows past their expiry.
    pub expired: i64,
    /// Rows with a replacement.
    pub superseded: i64,
}

type KnowledgeTuple = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    f64,
    f64,
    bool,
    Option<i64>,
    Option<String>,
);

const KNOWLEDGE_COLUMNS: &str = "id, title, summary, source_type, source_url, source_session, \
                                 topic_tags, entities, confidence, importance, verified, \
                                 superseded_by, expires_at";

/// Same columns qualified for joins against `knowledge_fts` (which carries
/// its own `title`, `summary`, and `topic_tags` columns).
const QUALIFIED_KNOWLEDGE_COLUMNS: &str =
    "k.id, k.title, k.summary, k.source_type, k.source_url, k.source_session, \
     k.topic_tags, k.entities, k.confidence, k.importance, k.verified, \
     k.superseded_by, k.expires_at";

/// Gateway to the `knowledge_cache` table and its FTS5 mirror.
pub struct KnowledgeStore {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("embedder", &self.embedder.is_some())
            .finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    /// Create a store; without an embedder, semantic search is unavailable.
    pub fn new(pool: SqlitePool, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { pool, embedder }
    }

    /// Insert an entry, computing its embedding by default.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the insert fails.
    pub async fn add(&self, entry: &KnowledgeEntry) -> CoreResult<i64> {
        let embedding = self.compute_embedding(entry).await;
        self.insert(entry, embedding).await
    }

    async fn compute_embedding(&self, entry: &KnowledgeEntry) -> Option<Vec<u8>> {
        let embedder = self.embedder.as_ref()?;
        let text = format!("{}\n{}", entry.title, entry.summary);
        let opts = EmbedOptions {
            session_id: entry.source_session.clone(),
            source: Some("knowledge".to_owned()),
        };
        match embedder.embed(&text, &opts).await {
            Ok(vec) => Some(vector::pack(&vec)),
            Err(err) => {
                warn!(error = %err, "knowledge embedding failed; storing without vector");
                None
            }
        }
    }

    async fn insert(&self, entry: &KnowledgeEntry, embedding: Option<Vec<u8>>) -> CoreResult<i64> {
        let tags = serde_json::to_string(&entry.topic_tags)?;
        let entities = serde_json::to_string(&entry.entities)?;
        let result = sqlx::query(
            "INSERT INTO knowledge_cache (title, summary, source_type, source_url, \
             source_session, topic_tags, entities, confidence, importance, verified, \
             expires_at, embedding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&entry.title)
        .bind(&entry.summary)
        .bind(entry.source_type.as_str())
        .bind(&entry.source_url)
        .bind(&entry.source_session)
        .bind(tags)
        .bind(entities)
        .bind(entry.confidence)
        .bind(entry.importance)
        .bind(entry.verified)
        .bind(&entry.expires_at)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Keyword search over the FTS5 mirror.
    ///
    /// With `weight_by_importance`, ordering uses `rank * (1 + importance)`;
    /// FTS5 rank grows more negative for better matches, so weighting makes
    /// important rows sort earlier.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn search(
        &self,
        query: &str,
        opts: &KnowledgeSearchOptions,
    ) -> CoreResult<Vec<KnowledgeEntry>> {
        let sanitised = super::sanitise_match_query(query);
        if sanitised.is_empty() {
            return Ok(Vec::new());
        }

        let order = if opts.weight_by_importance {
            "f.rank * (1 + k.importance)"
        } else {
            "f.rank"
        };
        let expiry_filter = if opts.include_expired {
            ""
        } else {
            "AND (k.expires_at IS NULL OR k.expires_at > datetime('now'))"
        };

        let rows: Vec<KnowledgeTuple> = sqlx::query_as(&format!(
            "SELECT {QUALIFIED_KNOWLEDGE_COLUMNS} \
             FROM knowledge_fts f \
             JOIN knowledge_cache k ON f.rowid = k.id \
             WHERE knowledge_fts MATCH ?1 {expiry_filter} \
             ORDER BY {order} LIMIT ?2"
        ))
        .bind(&sanitised)
        .bind(i64::try_from(opts.limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_tuple).collect()
    }

    /// Semantic search over stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when no embedder is configured.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<(KnowledgeEntry, f32)>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            CoreError::Validation("semantic search requires an embedding model".to_owned())
        })?;
        let opts = EmbedOptions {
            session_id: None,
            source: Some("knowledge".to_owned()),
        };
        let query_vector = embedder.embed(query, &opts).await?;

        let rows: Vec<(Vec<u8>, i64)> = sqlx::query_as(
            "SELECT embedding, id FROM knowledge_cache \
             WHERE embedding IS NOT NULL \
               AND (expires_at IS NULL OR expires_at > datetime('now'))",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(i64, f32)> = Vec::new();
        for (blob, id) in rows {
            let Ok(stored) = vector::unpack(&blob) else {
                continue;
            };
            let similarity = vector::cosine_similarity(&query_vector, &stored);
            if similarity >= threshold {
                scored.push((id, similarity));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut results = Vec::with_capacity(scored.len());
        for (id, similarity) in scored {
            results.push((self.get(id).await?, similarity));
        }
        Ok(results)
    }

    /// Fetch one entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn get(&self, id: i64) -> CoreResult<KnowledgeEntry> {
        let row: Option<KnowledgeTuple> = sqlx::query_as(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(entry_from_tuple)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("knowledge entry {id}")))
    }

    /// Recent entries, optionally including expired ones.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list(&self, limit: usize, include_expired: bool) -> CoreResult<Vec<KnowledgeEntry>> {
        let expiry_filter = if include_expired {
            ""
        } else {
            "WHERE expires_at IS NULL OR expires_at > datetime('now')"
        };
        let rows: Vec<KnowledgeTuple> = sqlx::query_as(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_cache {expiry_filter} \
             ORDER BY id DESC LIMIT ?1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(entry_from_tuple).collect()
    }

    /// Mark an entry as operator-verified.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn verify(&self, id: i64) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE knowledge_cache SET verified = 1, updated_at = datetime('now') WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("knowledge entry {id}")));
        }
        Ok(())
    }

    /// Replace an entry: insert the new one, then point the old row's
    /// `superseded_by` at it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when `old_id` does not exist.
    pub async fn supersede(&self, old_id: i64, new_entry: &KnowledgeEntry) -> CoreResult<i64> {
        // Make sure the old row exists before paying for an embedding.
        self.get(old_id).await?;

        let embedding = self.compute_embedding(new_entry).await;
        let new_id = self.insert(new_entry, embedding).await?;

        sqlx::query(
            "UPDATE knowledge_cache SET superseded_by = ?1, updated_at = datetime('now') \
             WHERE id = ?2",
        )
        .bind(new_id)
        .bind(old_id)
        .execute(&self.pool)
        .await?;

        Ok(new_id)
    }

    /// Corpus statistics.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn stats(&self) -> CoreResult<KnowledgeStats> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT count(*), \
                    coalesce(sum(verified), 0), \
                    coalesce(sum(CASE WHEN expires_at IS NOT NULL \
                        AND expires_at <= datetime('now') THEN 1 ELSE 0 END), 0), \
                    coalesce(sum(CASE WHEN superseded_by IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM knowledge_cache",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(KnowledgeStats {
            total: row.0,
            verified: row.1,
            expired: row.2,
            superseded: row.3,
        })
    }
}

fn entry_from_tuple(row: KnowledgeTuple) -> CoreResult<KnowledgeEntry> {
    let (
        id,
        title,
        summary,
        source_type,
        source_url,
        source_session,
        topic_tags,
        entities,
        confidence,
        importance,
        verified,
        superseded_by,
        expires_at,
    ) = row;
    Ok(KnowledgeEntry {
        id: Some(id),
        title,
        summary,
        source_type: KnowledgeSource::parse(&source_type)?,
        source_url,
        source_session,
        topic_tags: serde_json::from_str(&topic_tags)
            .map_err(|e| CoreError::Parse(format!("knowledge tags: {e}")))?,
        entities: serde_json::from_str(&entities)
            .map_err(|e| CoreError::Parse(format!("knowledge entities: {e}")))?,
        confidence,
        importance,
        verified,
        superseded_by,
        expires_at,
    })
}
