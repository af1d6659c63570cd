//! Incremental transcript indexing with hash-based change detection.
//!
//! The `session_files` table records each file's SHA-256, chunk count, and
//! status. On every run:
//!
//! - new files are fully indexed
//! - hash-changed files have their prior chunks deleted in the same
//!   transaction that inserts the first replacement batch
//! - unchanged complete files are skipped
//! - unchanged `partial` files resume from the next un-indexed chunk index
//! - rows for deleted files have their chunks purged
//!
//! Chunks are written in batches of 100, one transaction per batch, with a
//! cooperative yield between batches. A crash mid-file leaves
//! `status = 'partial'` and the next run resumes.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, ActivityRecord};
use crate::embedding::{EmbedOptions, Embedder};
use crate::errors::{CoreError, CoreResult};
use crate::store::{health, vector};

use super::chunker::{self, ChunkerConfig, RawChunk};
use super::context::{ContextGenerator, ContextStatus};
use super::transcript;

/// Chunks written per transaction.
const BATCH_SIZE: usize = 100;

/// Outcome of indexing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// File was new or changed; all chunks (re)written.
    Indexed {
        /// Chunks written.
        chunks: usize,
    },
    /// Partial file resumed from its last indexed chunk.
    Resumed {
        /// Chunks written this run.
        chunks: usize,
    },
    /// Hash unchanged and status complete.
    Skipped,
    /// Too many parse errors; not indexed.
    Quarantined,
}

/// Aggregate report for a directory run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Files fully indexed or resumed.
    pub indexed: usize,
    /// Files skipped as unchanged.
    pub skipped: usize,
    /// Files quarantined.
    pub quarantined: usize,
    /// Files that errored (recorded in the error log).
    pub failed: usize,
    /// Total chunks written.
    pub chunks_written: usize,
    /// Session rows purged for deleted files.
    pub orphans_purged: usize,
}

/// The transcript indexer.
pub struct RecallIndexer {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    context: Option<Arc<dyn ContextGenerator>>,
    activity: ActivityLog,
    config: ChunkerConfig,
}

impl std::fmt::Debug for RecallIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallIndexer")
            .field("contextualiser", &self.context.is_some())
            .finish_non_exhaustive()
    }
}

struct PreparedChunk {
    chunk: RawChunk,
    context_prefix: Option<String>,
    context_status: ContextStatus,
    embedding: Vec<u8>,
}

impl RecallIndexer {
    /// Create an indexer. Without a context generator, chunks stay
    /// `pending` and are embedded from their raw text.
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        context: Option<Arc<dyn ContextGenerator>>,
        activity: ActivityLog,
        config: ChunkerConfig,
    ) -> Self {
        Self {
            pool,
            embedder,
            context,
            activity,
            config,
        }
    }

    /// Index every `.jsonl` file in a directory and purge orphans.
    ///
    /// Per-file failures are recorded in the error log and the run
    /// continues with the next file.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be read or orphan
    /// purging fails.
    pub async fn index_directory(&self, dir: &Path) -> CoreResult<IndexReport> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| CoreError::Parse(format!("cannot read {}: {e}", dir.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Parse(format!("cannot read {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = IndexReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for path in &paths {
            seen.insert(transcript::session_id_for(path));
            match self.index_file(path).await {
                Ok(FileOutcome::Indexed { chunks }) | Ok(FileOutcome::Resumed { chunks }) => {
                    report.indexed = report.indexed.saturating_add(1);
                    report.chunks_written = report.chunks_written.saturating_add(chunks);
                }
                Ok(FileOutcome::Skipped) => {
                    report.skipped = report.skipped.saturating_add(1);
                }
                Ok(FileOutcome::Quarantined) => {
                    report.quarantined = report.quarantined.saturating_add(1);
                }
                Err(err) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(path = %path.display(), error = %err, "indexing failed, continuing");
                    let _ = health::record_error(
                        &self.pool,
                        "recall",
                        &err.to_string(),
                        Some(&serde_json::json!({ "path": path.display().to_string() })),
                    )
                    .await;
                }
            }
        }

        report.orphans_purged = self.purge_orphans(&seen).await?;
        info!(?report, "index run finished");
        Ok(report)
    }

    /// Index a single transcript file.
    ///
    /// # Errors
    ///
    /// Returns parse errors for unreadable files and embedding/storage
    /// errors mid-run (the file is left `partial` and resumable).
    pub async fn index_file(&self, path: &Path) -> CoreResult<FileOutcome> {
        let session_id = transcript::session_id_for(path);

        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| CoreError::Parse(format!("cannot read {}: {e}", path.display())))?;
        let file_hash = hex_digest(&raw);
        let contents = String::from_utf8(raw)
            .map_err(|e| CoreError::Parse(format!("{} is not UTF-8: {e}", path.display())))?;

        let existing: Option<(String, String)> = sqlx::query_as(
            "SELECT file_hash, status FROM session_files WHERE session_id = ?1",
        )
        .bind(&session_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((stored_hash, status)) = &existing {
            if *stored_hash == file_hash && status == "complete" {
                debug!(session_id, "unchanged, skipping");
                return Ok(FileOutcome::Skipped);
            }
        }

        let started = Instant::now();
        let loaded = transcript::parse_transcript(&contents);
        if loaded.should_quarantine() {
            self.quarantine(&session_id, path, &file_hash, loaded.parse_errors)
                .await?;
            return Ok(FileOutcome::Quarantined);
        }

        let outcome = chunker::chunk_records(&loaded.records, &self.config);
        let total_chunks = outcome.chunks.len();

        // Unchanged partial file: resume after the last indexed chunk.
        let resume = matches!(
            &existing,
            Some((stored_hash, status)) if *stored_hash == file_hash && status == "partial"
        );
        let start_index = if resume {
            let row: (i64,) = sqlx::query_as(
                "SELECT coalesce(max(chunk_index) + 1, 0) FROM session_chunks \
                 WHERE session_id = ?1",
            )
            .bind(&session_id)
            .fetch_one(&self.pool)
            .await?;
            usize::try_from(row.0).unwrap_or(0)
        } else {
            0
        };

        let pending = outcome.chunks.get(start_index..).unwrap_or(&[]);
        let mut written = 0usize;

        if pending.is_empty() && !resume {
            // Nothing to insert, but a changed file may still have stale
            // chunks from its previous contents.
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM session_chunks WHERE session_id = ?1")
                .bind(&session_id)
                .execute(&mut *tx)
                .await?;
            upsert_file_row(&mut tx, &session_id, path, &file_hash, "partial").await?;
            tx.commit().await?;
        }

        for (batch_no, batch) in pending.chunks(BATCH_SIZE).enumerate() {
            let prepared = self.prepare_batch(&session_id, batch).await?;

            let mut tx = self.pool.begin().await?;

            if batch_no == 0 && !resume {
                // Replacing a changed file: old chunks die in the same
                // transaction that inserts the first new batch.
                sqlx::query("DELETE FROM session_chunks WHERE session_id = ?1")
                    .bind(&session_id)
                    .execute(&mut *tx)
                    .await?;
                upsert_file_row(&mut tx, &session_id, path, &file_hash, "partial").await?;
            }

            let batch_base = start_index.saturating_add(batch_no.saturating_mul(BATCH_SIZE));
            for (offset, item) in prepared.iter().enumerate() {
                let chunk_index = i64::try_from(batch_base.saturating_add(offset)).unwrap_or(0);
                sqlx::query(
                    "INSERT INTO session_chunks (session_id, chunk_index, timestamp, \
                     speakers, topic_tags, has_decision, has_action, content, \
                     context_prefix, context_status, token_count, embedding) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .bind(&session_id)
                .bind(chunk_index)
                .bind(&item.chunk.timestamp)
                .bind(serde_json::to_string(&item.chunk.speakers)?)
                .bind(serde_json::to_string(&item.chunk.topic_tags)?)
                .bind(item.chunk.has_decision)
                .bind(item.chunk.has_action)
                .bind(&item.chunk.content)
                .bind(&item.context_prefix)
                .bind(item.context_status.as_str())
                .bind(i64::try_from(item.chunk.token_count).unwrap_or(0))
                .bind(&item.embedding)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            written = written.saturating_add(batch.len());

            // Cooperative yield between batches.
            tokio::task::yield_now().await;
        }

        let index_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.finalize_file(&session_id, path, &file_hash, total_chunks, index_time_ms)
            .await?;

        self.activity
            .log_full(ActivityRecord {
                action: "session_indexed".to_owned(),
                category: Some("recall".to_owned()),
                description: Some(format!("indexed {written} chunks for {session_id}")),
                metadata: Some(serde_json::json!({
                    "chunks": total_chunks,
                    "truncated": outcome.truncated,
                    "resumed": resume,
                })),
                session_id: Some(session_id.clone()),
                source: Some("cron".to_owned()),
                related_id: None,
            })
            .await?;

        if resume {
            Ok(FileOutcome::Resumed { chunks: written })
        } else {
            Ok(FileOutcome::Indexed { chunks: written })
        }
    }

    /// Re-run contextualisation for chunks whose prefix generation failed,
    /// re-embedding on success.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the scan fails; per-chunk failures are
    /// counted and skipped.
    pub async fn retry_failed_contexts(&self, limit: usize) -> CoreResult<usize> {
        let Some(generator) = &self.context else {
            return Ok(0);
        };

        let rows: Vec<(i64, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, session_id, timestamp, content FROM session_chunks \
             WHERE context_status = 'failed' ORDER BY id LIMIT ?1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut repaired = 0usize;
        for (id, session_id, timestamp, content) in rows {
            let prefix = match generator
                .context_prefix(&session_id, timestamp.as_deref(), &content)
                .await
            {
                Ok(p) => p,
                Err(err) => {
                    debug!(chunk = id, error = %err, "context retry failed");
                    continue;
                }
            };

            let opts = EmbedOptions {
                session_id: Some(session_id.clone()),
                source: Some("recall".to_owned()),
            };
            let embedded = match self
                .embedder
                .embed(&format!("{prefix}\n\n{content}"), &opts)
                .await
            {
                Ok(v) => vector::pack(&v),
                Err(err) => {
                    debug!(chunk = id, error = %err, "re-embedding failed");
                    continue;
                }
            };

            sqlx::query(
                "UPDATE session_chunks SET context_prefix = ?1, \
                 context_status = 'complete', embedding = ?2 WHERE id = ?3",
            )
            .bind(&prefix)
            .bind(&embedded)
            .bind(id)
            .execute(&self.pool)
            .await?;
            repaired = repaired.saturating_add(1);
        }

        Ok(repaired)
    }

    async fn prepare_batch(
        &self,
        session_id: &str,
        batch: &[RawChunk],
    ) -> CoreResult<Vec<PreparedChunk>> {
        let mut prefixes: Vec<(Option<String>, ContextStatus)> = Vec::with_capacity(batch.len());
        for chunk in batch {
            match &self.context {
                Some(generator) => {
                    match generator
                        .context_prefix(session_id, chunk.timestamp.as_deref(), &chunk.content)
                        .await
                    {
                        Ok(prefix) => prefixes.push((Some(prefix), ContextStatus::Complete)),
                        Err(err) => {
                            warn!(session_id, error = %err, "contextualisation failed");
                            prefixes.push((None, ContextStatus::Failed));
                        }
                    }
                }
                None => prefixes.push((None, ContextStatus::Pending)),
            }
        }

        let texts: Vec<String> = batch
            .iter()
            .zip(prefixes.iter())
            .map(|(chunk, (prefix, _))| match prefix {
                Some(p) => format!("{p}\n\n{}", chunk.content),
                None => chunk.content.clone(),
            })
            .collect();

        let opts = EmbedOptions {
            session_id: Some(session_id.to_owned()),
            source: Some("recall".to_owned()),
        };
        let vectors = self.embedder.embed_batch(&texts, &opts).await?;
        if vectors.len() != batch.len() {
            return Err(CoreError::Parse(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        Ok(batch
            .iter()
            .cloned()
            .zip(prefixes)
            .zip(vectors)
            .map(|((chunk, (context_prefix, context_status)), vec)| PreparedChunk {
                chunk,
                context_prefix,
                context_status,
                embedding: vector::pack(&vec),
            })
            .collect())
    }

    async fn quarantine(
        &self,
        session_id: &str,
        path: &Path,
        file_hash: &str,
        parse_errors: usize,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        upsert_file_row(&mut tx, session_id, path, file_hash, "failed").await?;
        tx.commit().await?;

        self.activity
            .log_full(ActivityRecord {
                action: "session_quarantined".to_owned(),
                category: Some("recall".to_owned()),
                description: Some(format!(
                    "{session_id}: {parse_errors} malformed lines, not indexing"
                )),
                session_id: Some(session_id.to_owned()),
                source: Some("cron".to_owned()),
                ..ActivityRecord::default()
            })
            .await?;
        warn!(session_id, parse_errors, "session quarantined");
        Ok(())
    }

    async fn finalize_file(
        &self,
        session_id: &str,
        path: &Path,
        file_hash: &str,
        chunk_count: usize,
        index_time_ms: i64,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO session_files (session_id, file_path, file_hash, last_indexed, \
             chunk_count, index_time_ms, status) \
             VALUES (?1, ?2, ?3, datetime('now'), ?4, ?5, 'complete') \
             ON CONFLICT(session_id) DO UPDATE SET \
             file_path = excluded.file_path, \
             file_hash = excluded.file_hash, \
             last_indexed = excluded.last_indexed, \
             chunk_count = excluded.chunk_count, \
             index_time_ms = excluded.index_time_ms, \
             status = 'complete'",
        )
        .bind(session_id)
        .bind(path.display().to_string())
        .bind(file_hash)
        .bind(i64::try_from(chunk_count).unwrap_or(0))
        .bind(index_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_orphans(&self, seen: &HashSet<String>) -> CoreResult<usize> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT session_id FROM session_files")
            .fetch_all(&self.pool)
            .await?;

        let mut purged = 0usize;
        for (session_id,) in rows {
            if seen.contains(&session_id) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM session_chunks WHERE session_id = ?1")
                .bind(&session_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM session_files WHERE session_id = ?1")
                .bind(&session_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            purged = purged.saturating_add(1);
            info!(session_id, "purged chunks for deleted transcript");
        }
        Ok(purged)
    }
}

async fn upsert_file_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
    path: &Path,
    file_hash: &str,
    status: &str,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO session_files (session_id, file_path, file_hash, chunk_count, status) \
         VALUES (?1, ?2, ?3, 0, ?4) \
         ON CONFLICT(session_id) DO UPDATE SET \
         file_path = excluded.file_path, \
         file_hash = excluded.file_hash, \
         status = excluded.status",
    )
    .bind(session_id)
    .bind(path.display().to_string())
    .bind(file_hash)
    .bind(status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
