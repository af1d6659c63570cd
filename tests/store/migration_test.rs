//! Tests for schema bootstrap, migrations, constraints, and FTS triggers.

use openclaw::store::{migrations, Storage};

async fn fresh() -> Storage {
    Storage::open_in_memory()
        .await
        .expect("in-memory storage should open")
}

#[tokio::test]
async fn migration_applies_on_fresh_database() {
    let storage = fresh().await;
    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM pipeline")
        .fetch_one(storage.pool())
        .await
        .expect("pipeline table should exist");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn migration_is_idempotent() {
    let storage = fresh().await;
    // Storage::open_in_memory already ran the sequence once; run it twice
    // more and verify the schema is unchanged and usable.
    migrations::run(storage.pool()).await.expect("second run");
    migrations::run(storage.pool()).await.expect("third run");

    sqlx::query("INSERT INTO projects (name) VALUES ('p')")
        .execute(storage.pool())
        .await
        .expect("insert should work after repeated migration");
}

#[tokio::test]
async fn check_constraint_rejects_invalid_pipeline_type() {
    let storage = fresh().await;
    let result = sqlx::query("INSERT INTO pipeline (type, title, stage) VALUES ('epic', 'x', 'idea')")
        .execute(storage.pool())
        .await;
    assert!(result.is_err(), "unknown type should be rejected by CHECK");
}

#[tokio::test]
async fn check_constraint_rejects_invalid_memory_category() {
    let storage = fresh().await;
    let result = sqlx::query("INSERT INTO memory (category, content) VALUES ('dream', 'x')")
        .execute(storage.pool())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn check_constraint_rejects_negative_cost() {
    let storage = fresh().await;
    let result = sqlx::query(
        "INSERT INTO token_usage (model, provider, cost_usd) VALUES ('m', 'p', -0.1)",
    )
    .execute(storage.pool())
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn memory_embeddings_unique_per_model() {
    let storage = fresh().await;
    sqlx::query("INSERT INTO memory (category, content) VALUES ('fact', 'x')")
        .execute(storage.pool())
        .await
        .expect("memory insert");

    sqlx::query("INSERT INTO memory_embeddings (memory_id, model, embedding) VALUES (1, 'm', x'00')")
        .execute(storage.pool())
        .await
        .expect("first embedding");
    let duplicate = sqlx::query(
        "INSERT INTO memory_embeddings (memory_id, model, embedding) VALUES (1, 'm', x'01')",
    )
    .execute(storage.pool())
    .await;
    assert!(duplicate.is_err(), "(memory_id, model) must be unique");
}

#[tokio::test]
async fn memory_delete_cascades_embeddings() {
    let storage = fresh().await;
    sqlx::query("INSERT INTO memory (category, content) VALUES ('fact', 'x')")
        .execute(storage.pool())
        .await
        .expect("memory insert");
    sqlx::query("INSERT INTO memory_embeddings (memory_id, model, embedding) VALUES (1, 'm', x'00')")
        .execute(storage.pool())
        .await
        .expect("embedding insert");

    sqlx::query("DELETE FROM memory WHERE id = 1")
        .execute(storage.pool())
        .await
        .expect("delete");

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM memory_embeddings")
        .fetch_one(storage.pool())
        .await
        .expect("count");
    assert_eq!(count, 0, "embeddings should cascade with their memory");
}

#[tokio::test]
async fn session_chunks_unique_per_index() {
    let storage = fresh().await;
    sqlx::query(
        "INSERT INTO session_chunks (session_id, chunk_index, content) VALUES ('s1', 0, 'a')",
    )
    .execute(storage.pool())
    .await
    .expect("first chunk");
    let duplicate = sqlx::query(
        "INSERT INTO session_chunks (session_id, chunk_index, content) VALUES ('s1', 0, 'b')",
    )
    .execute(storage.pool())
    .await;
    assert!(duplicate.is_err(), "(session_id, chunk_index) must be unique");
}

#[tokio::test]
async fn knowledge_fts_mirror_tracks_inserts_updates_deletes() {
    let storage = fresh().await;

    sqlx::query("INSERT INTO knowledge_cache (title, summary) VALUES ('rust async', 'notes')")
        .execute(storage.pool())
        .await
        .expect("insert");

    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT rowid FROM knowledge_fts WHERE knowledge_fts MATCH 'async'")
            .fetch_all(storage.pool())
            .await
            .expect("fts match");
    assert_eq!(rows.len(), 1, "insert trigger should index the row");

    sqlx::query("UPDATE knowledge_cache SET title = 'tokio runtime' WHERE id = 1")
        .execute(storage.pool())
        .await
        .expect("update");

    let stale: Vec<(i64,)> =
        sqlx::query_as("SELECT rowid FROM knowledge_fts WHERE knowledge_fts MATCH 'async'")
            .fetch_all(storage.pool())
            .await
            .expect("fts match");
    assert!(stale.is_empty(), "update trigger should drop the old terms");

    let fresh_rows: Vec<(i64,)> =
        sqlx::query_as("SELECT rowid FROM knowledge_fts WHERE knowledge_fts MATCH 'tokio'")
            .fetch_all(storage.pool())
            .await
            .expect("fts match");
    assert_eq!(fresh_rows.len(), 1, "update trigger should index new terms");

    sqlx::query("DELETE FROM knowledge_cache WHERE id = 1")
        .execute(storage.pool())
        .await
        .expect("delete");

    let gone: Vec<(i64,)> =
        sqlx::query_as("SELECT rowid FROM knowledge_fts WHERE knowledge_fts MATCH 'tokio'")
            .fetch_all(storage.pool())
            .await
            .expect("fts match");
    assert!(gone.is_empty(), "delete trigger should remove the row");
}

#[tokio::test]
async fn legacy_pipeline_stages_are_storable() {
    let storage = fresh().await;
    for stage in ["ready", "build", "review"] {
        sqlx::query("INSERT INTO pipeline (type, title, stage) VALUES ('feature', 'x', ?1)")
            .bind(stage)
            .execute(storage.pool())
            .await
            .expect("legacy stage should satisfy the CHECK union");
    }
}
