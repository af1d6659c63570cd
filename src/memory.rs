//! Long-term memory store with per-model embeddings and semantic search.
//!
//! Memories are small typed facts about the operator and their world. Each
//! memory may carry one embedding per model in `memory_embeddings`
//! (unique on `(memory_id, model)`); the most recent vector is also kept on
//! the row itself for cheap scans. Deleting a memory cascades to its
//! embeddings.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::activity::{self, ActivityRecord, RelatedId};
use crate::embedding::{EmbedOptions, Embedder};
use crate::errors::{CoreError, CoreResult};
use crate::store::vector;

/// Maximum content size for a single memory (64 KiB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Default similarity threshold for semantic search.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.4;

/// Kind of memory stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryCategory {
    /// A declarative fact.
    Fact,
    /// An operator preference.
    Preference,
    /// A learned lesson.
    Lesson,
    /// A follow-up the operator mentioned.
    Todo,
    /// Information about a person.
    Person,
    /// Information about a project.
    Project,
    /// Anything else.
    Other,
}

impl MemoryCategory {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Lesson => "lesson",
            Self::Todo => "todo",
            Self::Person => "person",
            Self::Project => "project",
            Self::Other => "other",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the value is not a recognised
    /// category.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "lesson" => Ok(Self::Lesson),
            "todo" => Ok(Self::Todo),
            "person" => Ok(Self::Person),
            "project" => Ok(Self::Project),
            "other" => Ok(Self::Other),
            other => Err(CoreError::Validation(format!(
                "invalid memory category: {other:?}"
            ))),
        }
    }
}

/// A memory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    /// Row id (`None` for entries not yet persisted).
    pub id: Option<i64>,
    /// Category.
    pub category: MemoryCategory,
    /// Optional subject key (person name, project name, ...).
    pub subject: Option<String>,
    /// The remembered content.
    pub content: String,
    /// Importance 1–10.
    pub importance: i64,
    /// Where the memory came from.
    pub source: Option<String>,
    /// Optional expiry timestamp.
    pub expires_at: Option<String>,
    /// Last time search returned this memory.
    pub last_accessed: Option<String>,
    /// How many times search returned this memory.
    pub access_count: i64,
}

impl MemoryEntry {
    /// Convenience constructor with defaults.
    pub fn new(category: MemoryCategory, content: &str) -> Self {
        Self {
            id: None,
            category,
            subject: None,
            content: content.to_owned(),
            importance: 5,
            source: None,
            expires_at: None,
            last_accessed: None,
            access_count: 0,
        }
    }
}

/// A semantic search hit.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    /// The matched memory.
    pub memory: MemoryEntry,
    /// Cosine similarity against the query.
    pub similarity: f32,
}

/// Options for [`MemoryStore::semantic_search`].
#[derive(Debug, Clone)]
pub struct SemanticSearchOptions {
    /// Maximum hits returned.
    pub limit: usize,
    /// Minimum cosine similarity.
    pub threshold: f32,
    /// Session attributed in embedding usage accounting.
    pub session_id: Option<String>,
    /// Calling subsystem for usage accounting.
    pub source: Option<String>,
}

impl Default for SemanticSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            session_id: None,
            source: None,
        }
    }
}

type MemoryTuple = (
    i64,
    String,
    Option<String>,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

const MEMORY_COLUMNS: &str = "id, category, subject, content, importance, source, \
                              expires_at, last_accessed, access_count";

/// Gateway to the `memory` and `memory_embeddings` tables.
pub struct MemoryStore {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("embedder", &self.embedder.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a store. Without an embedder, semantic search is unavailable
    /// and `add_memory` stores no vectors.
    pub fn new(pool: SqlitePool, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { pool, embedder }
    }

    /// Persist a memory, optionally generating its embedding in-call.
    ///
    /// The row insert, the embedding rows, and the activity record commit in
    /// one transaction. Embedding failures degrade to a vectorless insert.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for oversized content, storage
    /// errors otherwise.
    pub async fn add_memory(
        &self,
        entry: &MemoryEntry,
        with_embedding: bool,
    ) -> CoreResult<i64> {
        if entry.content.len() > MAX_CONTENT_SIZE {
            return Err(CoreError::Validation(format!(
                "memory content of {} bytes exceeds the {MAX_CONTENT_SIZE} byte limit",
                entry.content.len()
            )));
        }

        // Generate the vector before opening the transaction; provider I/O
        // must not hold a write transaction open.
        let mut embedded: Option<(String, Vec<u8>)> = None;
        if with_embedding {
            if let Some(embedder) = &self.embedder {
                let opts = EmbedOptions {
                    session_id: None,
                    source: Some("memory".to_owned()),
                };
                match embedder.embed(&entry.content, &opts).await {
                    Ok(vec) => {
                        embedded = Some((embedder.model().to_owned(), vector::pack(&vec)));
                    }
                    Err(err) => {
                        warn!(error = %err, "embedding failed; saving memory without vector");
                    }
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO memory (category, subject, content, importance, source, \
             expires_at, embedding) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(entry.category.as_str())
        .bind(&entry.subject)
        .bind(&entry.content)
        .bind(entry.importance)
        .bind(&entry.source)
        .bind(&entry.expires_at)
        .bind(embedded.as_ref().map(|(_, blob)| blob.clone()))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        if let Some((model, blob)) = &embedded {
            sqlx::query(
                "INSERT INTO memory_embeddings (memory_id, model, embedding) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(memory_id, model) DO UPDATE SET \
                 embedding = excluded.embedding, updated_at = datetime('now')",
            )
            .bind(id)
            .bind(model)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        activity::append_tx(
            &mut tx,
            &ActivityRecord {
                action: "memory_created".to_owned(),
                category: Some("memory".to_owned()),
                description: Some(entry.content.chars().take(120).collect()),
                related_id: Some(RelatedId::new("memory", id).to_string()),
                source: entry.source.clone(),
                ..ActivityRecord::default()
            },
        )
        .await?;

        tx.commit().await?;
        debug!(id, category = entry.category.as_str(), "memory saved");
        Ok(id)
    }

    /// Fetch one memory by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn get(&self, id: i64) -> CoreResult<MemoryEntry> {
        let row: Option<MemoryTuple> = sqlx::query_as(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(entry_from_tuple)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("memory {id}")))
    }

    /// List memories in a category, most important first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list_by_category(
        &self,
        category: MemoryCategory,
        limit: usize,
    ) -> CoreResult<Vec<MemoryEntry>> {
        let rows: Vec<MemoryTuple> = sqlx::query_as(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory WHERE category = ?1 \
             ORDER BY importance DESC, id DESC LIMIT ?2"
        ))
        .bind(category.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(entry_from_tuple).collect()
    }

    /// Delete a memory; its embeddings cascade.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM memory WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    /// Semantic search: embed the query, then rank stored vectors by cosine
    /// similarity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when no embedder is configured;
    /// embedding and storage errors otherwise.
    pub async fn semantic_search(
        &self,
        query: &str,
        opts: &SemanticSearchOptions,
    ) -> CoreResult<Vec<MemoryHit>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            CoreError::Validation("semantic search requires an embedding model".to_owned())
        })?;

        let embed_opts = EmbedOptions {
            session_id: opts.session_id.clone(),
            source: opts.source.clone().or_else(|| Some("memory".to_owned())),
        };
        let query_vector = embedder.embed(query, &embed_opts).await?;
        self.search_by_embedding(&query_vector, embedder.model(), opts.limit, opts.threshold)
            .await
    }

    /// Rank stored vectors for `model` against a prepared query vector.
    ///
    /// Expired memories are excluded. Hits have their access statistics
    /// bumped.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the scan fails.
    pub async fn search_by_embedding(
        &self,
        query_vector: &[f32],
        model: &str,
        limit: usize,
        threshold: f32,
    ) -> CoreResult<Vec<MemoryHit>> {
        let rows: Vec<(Vec<u8>, i64, String, Option<String>, String, i64, Option<String>, Option<String>, Option<String>, i64)> =
            sqlx::query_as(
                "SELECT e.embedding, m.id, m.category, m.subject, m.content, m.importance, \
                        m.source, m.expires_at, m.last_accessed, m.access_count \
                 FROM memory_embeddings e \
                 JOIN memory m ON m.id = e.memory_id \
                 WHERE e.model = ?1 \
                   AND (m.expires_at IS NULL OR m.expires_at > datetime('now'))",
            )
            .bind(model)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::new();
        for (blob, id, category, subject, content, importance, source, expires_at, last_accessed, access_count) in
            rows
        {
            let stored = match vector::unpack(&blob) {
                Ok(v) => v,
                Err(err) => {
                    warn!(memory_id = id, error = %err, "skipping malformed embedding blob");
                    continue;
                }
            };
            let similarity = vector::cosine_similarity(query_vector, &stored);
            if similarity < threshold {
                continue;
            }
            hits.push(MemoryHit {
                memory: MemoryEntry {
                    id: Some(id),
                    category: MemoryCategory::parse(&category)?,
                    subject,
                    content,
                    importance,
                    source,
                    expires_at,
                    last_accessed,
                    access_count,
                },
                similarity,
            });
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        for hit in &hits {
            if let Some(id) = hit.memory.id {
                let _ = sqlx::query(
                    "UPDATE memory SET last_accessed = datetime('now'), \
                     access_count = access_count + 1 WHERE id = ?1",
                )
                .bind(id)
                .execute(&self.pool)
                .await;
            }
        }

        Ok(hits)
    }
}

fn entry_from_tuple(row: MemoryTuple) -> CoreResult<MemoryEntry> {
    let (id, category, subject, content, importance, source, expires_at, last_accessed, access_count) =
        row;
    Ok(MemoryEntry {
        id: Some(id),
        category: MemoryCategory::parse(&category)?,
        subject,
        content,
        importance,
        source,
        expires_at,
        last_accessed,
        access_count,
    })
}
