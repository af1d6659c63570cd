//! Tests for incremental indexing: change detection, resume, quarantine,
//! orphan purge, and context fallback.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use openclaw::activity::ActivityLog;
use openclaw::embedding::{EmbedOptions, Embedder};
use openclaw::errors::{CoreError, CoreResult};
use openclaw::recall::chunker::ChunkerConfig;
use openclaw::recall::context::ContextGenerator;
use openclaw::recall::indexer::{FileOutcome, RecallIndexer};
use openclaw::store::Storage;

const DIMS: usize = 64;

struct MockEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.to_lowercase().split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.is_empty() {
            continue;
        }
        let mut h = 0usize;
        for b in word.bytes() {
            h = h.wrapping_mul(31).wrapping_add(usize::from(b));
        }
        v[h % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, _opts: &EmbedOptions) -> CoreResult<Vec<f32>> {
        Ok(embed_text(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _opts: &EmbedOptions,
    ) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model(&self) -> &str {
        "mock-embed"
    }
}

struct OkContext;

#[async_trait]
impl ContextGenerator for OkContext {
    async fn context_prefix(
        &self,
        session_id: &str,
        _timestamp: Option<&str>,
        _chunk_text: &str,
    ) -> CoreResult<String> {
        Ok(format!("Conversation from session {session_id}."))
    }
}

struct FailingContext;

#[async_trait]
impl ContextGenerator for FailingContext {
    async fn context_prefix(
        &self,
        _session_id: &str,
        _timestamp: Option<&str>,
        _chunk_text: &str,
    ) -> CoreResult<String> {
        Err(CoreError::Timeout("context model down".to_owned()))
    }
}

async fn fresh_storage() -> Storage {
    Storage::open_in_memory()
        .await
        .expect("in-memory storage should open")
}

fn indexer_with(storage: &Storage, context: Option<Arc<dyn ContextGenerator>>) -> RecallIndexer {
    RecallIndexer::new(
        storage.pool().clone(),
        Arc::new(MockEmbedder),
        context,
        ActivityLog::new(storage.pool().clone()),
        ChunkerConfig::default(),
    )
}

fn write_session(dir: &Path, name: &str, exchanges: &[(&str, &str)]) -> std::path::PathBuf {
    let path = dir.join(format!("{name}.jsonl"));
    let mut file = std::fs::File::create(&path).expect("create transcript");
    for (i, (question, answer)) in exchanges.iter().enumerate() {
        let user = serde_json::json!({
            "type": "message",
            "message": { "role": "user", "content": question },
            "timestamp": format!("2026-01-01T00:{i:02}:00Z"),
        });
        let assistant = serde_json::json!({
            "type": "message",
            "message": { "role": "assistant", "content": answer },
            "timestamp": format!("2026-01-01T00:{i:02}:30Z"),
        });
        writeln!(file, "{user}").expect("write");
        writeln!(file, "{assistant}").expect("write");
    }
    path
}

async fn chunk_count(storage: &Storage, session: &str) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM session_chunks WHERE session_id = ?1")
            .bind(session)
            .fetch_one(storage.pool())
            .await
            .expect("count");
    count
}

#[tokio::test]
async fn new_file_is_fully_indexed() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, Some(Arc::new(OkContext)));
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_session(
        dir.path(),
        "s1",
        &[("what is rrf", "rank fusion"), ("and fts", "keyword search")],
    );

    let outcome = indexer.index_file(&path).await.expect("index");
    assert_eq!(outcome, FileOutcome::Indexed { chunks: 2 });
    assert_eq!(chunk_count(&storage, "s1").await, 2);

    let (hash, status, count): (String, String, i64) = sqlx::query_as(
        "SELECT file_hash, status, chunk_count FROM session_files WHERE session_id = 's1'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("ledger row");
    assert_eq!(hash.len(), 64, "sha-256 hex digest");
    assert_eq!(status, "complete");
    assert_eq!(count, 2);

    let rows: Vec<(Option<Vec<u8>>, String, Option<String>, i64)> = sqlx::query_as(
        "SELECT embedding, context_status, context_prefix, chunk_index \
         FROM session_chunks WHERE session_id = 's1' ORDER BY chunk_index",
    )
    .fetch_all(storage.pool())
    .await
    .expect("chunks");
    for (i, (embedding, context_status, context_prefix, chunk_index)) in
        rows.iter().enumerate()
    {
        let blob = embedding.as_ref().expect("embedding stored");
        assert_eq!(blob.len(), DIMS * 4, "blob length = dims * 4");
        assert_eq!(context_status, "complete");
        assert!(context_prefix.as_deref().expect("prefix").contains("s1"));
        assert_eq!(*chunk_index, i64::try_from(i).expect("index"));
    }
}

#[tokio::test]
async fn unchanged_file_is_skipped() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_session(dir.path(), "s1", &[("q", "a")]);

    indexer.index_file(&path).await.expect("first index");
    let contents_before: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chunk_index, content FROM session_chunks WHERE session_id = 's1' \
         ORDER BY chunk_index",
    )
    .fetch_all(storage.pool())
    .await
    .expect("chunks");

    let outcome = indexer.index_file(&path).await.expect("second index");
    assert_eq!(outcome, FileOutcome::Skipped);

    let contents_after: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chunk_index, content FROM session_chunks WHERE session_id = 's1' \
         ORDER BY chunk_index",
    )
    .fetch_all(storage.pool())
    .await
    .expect("chunks");
    assert_eq!(contents_before, contents_after, "re-indexing is idempotent");
}

#[tokio::test]
async fn changed_file_replaces_chunks_without_duplicates() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");

    write_session(dir.path(), "s1", &[("q1", "a1"), ("q2", "a2")]);
    let path = dir.path().join("s1.jsonl");
    indexer.index_file(&path).await.expect("first index");
    assert_eq!(chunk_count(&storage, "s1").await, 2);

    // Append one exchange; the hash changes.
    write_session(dir.path(), "s1", &[("q1", "a1"), ("q2", "a2"), ("q3", "a3")]);
    let outcome = indexer.index_file(&path).await.expect("re-index");
    assert_eq!(outcome, FileOutcome::Indexed { chunks: 3 });

    assert_eq!(chunk_count(&storage, "s1").await, 3, "old chunks replaced");
    let (distinct,): (i64,) = sqlx::query_as(
        "SELECT count(DISTINCT chunk_index) FROM session_chunks WHERE session_id = 's1'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("distinct");
    assert_eq!(distinct, 3, "no duplicated chunk indexes");

    let (last_indexed,): (Option<String>,) =
        sqlx::query_as("SELECT last_indexed FROM session_files WHERE session_id = 's1'")
            .fetch_one(storage.pool())
            .await
            .expect("ledger");
    assert!(last_indexed.is_some());
}

#[tokio::test]
async fn too_many_bad_lines_quarantines_the_session() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("noisy.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    for i in 0..20 {
        writeln!(file, "broken {i}").expect("write");
    }
    drop(file);

    let outcome = indexer.index_file(&path).await.expect("index");
    assert_eq!(outcome, FileOutcome::Quarantined);
    assert_eq!(chunk_count(&storage, "noisy").await, 0);

    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM session_files WHERE session_id = 'noisy'")
            .fetch_one(storage.pool())
            .await
            .expect("ledger");
    assert_eq!(status, "failed");

    let (logged,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity WHERE action = 'session_quarantined'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("activity");
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn zero_user_messages_yield_zero_chunks() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("quiet.jsonl");
    let mut file = std::fs::File::create(&path).expect("create");
    let line = serde_json::json!({
        "type": "message",
        "message": { "role": "assistant", "content": "talking to myself" },
        "timestamp": "2026-01-01T00:00:00Z",
    });
    writeln!(file, "{line}").expect("write");
    drop(file);

    let outcome = indexer.index_file(&path).await.expect("index");
    assert_eq!(outcome, FileOutcome::Indexed { chunks: 0 });
    assert_eq!(chunk_count(&storage, "quiet").await, 0);

    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM session_files WHERE session_id = 'quiet'")
            .fetch_one(storage.pool())
            .await
            .expect("ledger");
    assert_eq!(status, "complete");
}

#[tokio::test]
async fn orphaned_sessions_are_purged() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");
    write_session(dir.path(), "keep", &[("q", "a")]);
    let doomed = write_session(dir.path(), "doomed", &[("q", "a")]);

    let report = indexer.index_directory(dir.path()).await.expect("index");
    assert_eq!(report.indexed, 2);
    assert_eq!(report.orphans_purged, 0);

    std::fs::remove_file(&doomed).expect("delete transcript");

    let report = indexer.index_directory(dir.path()).await.expect("re-index");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.orphans_purged, 1);
    assert_eq!(chunk_count(&storage, "doomed").await, 0);

    let (ledger_rows,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM session_files WHERE session_id = 'doomed'")
            .fetch_one(storage.pool())
            .await
            .expect("ledger");
    assert_eq!(ledger_rows, 0);
}

#[tokio::test]
async fn failed_context_degrades_then_retries() {
    let storage = fresh_storage().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_session(dir.path(), "s1", &[("q", "a")]);

    let broken = indexer_with(&storage, Some(Arc::new(FailingContext)));
    broken.index_file(&path).await.expect("index");

    let (status, prefix, embedding): (String, Option<String>, Option<Vec<u8>>) = sqlx::query_as(
        "SELECT context_status, context_prefix, embedding FROM session_chunks \
         WHERE session_id = 's1'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("chunk");
    assert_eq!(status, "failed");
    assert!(prefix.is_none());
    assert!(embedding.is_some(), "chunk embedded without prefix");

    let repaired = indexer_with(&storage, Some(Arc::new(OkContext)))
        .retry_failed_contexts(10)
        .await
        .expect("retry");
    assert_eq!(repaired, 1);

    let (status, prefix): (String, Option<String>) = sqlx::query_as(
        "SELECT context_status, context_prefix FROM session_chunks WHERE session_id = 's1'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("chunk");
    assert_eq!(status, "complete");
    assert!(prefix.is_some());
}

#[tokio::test]
async fn directory_report_counts_every_outcome() {
    let storage = fresh_storage().await;
    let indexer = indexer_with(&storage, None);
    let dir = tempfile::tempdir().expect("tempdir");

    write_session(dir.path(), "good", &[("q", "a")]);
    let bad_path = dir.path().join("bad.jsonl");
    let mut bad = std::fs::File::create(&bad_path).expect("create");
    for i in 0..20 {
        writeln!(bad, "junk {i}").expect("write");
    }
    drop(bad);
    // A non-transcript file is ignored entirely.
    std::fs::write(dir.path().join("README.md"), "not a transcript").expect("write");

    let report = indexer.index_directory(dir.path()).await.expect("index");
    assert_eq!(report.indexed, 1);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.chunks_written, 1);
}
