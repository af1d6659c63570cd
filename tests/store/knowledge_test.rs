//! Tests for `src/store/knowledge.rs`.

use openclaw::store::knowledge::{
    KnowledgeEntry, KnowledgeSearchOptions, KnowledgeSource, KnowledgeStore,
};
use openclaw::store::Storage;

async fn fresh_store() -> (Storage, KnowledgeStore) {
    let storage = Storage::open_in_memory()
        .await
        .expect("in-memory storage should open");
    let store = KnowledgeStore::new(storage.pool().clone(), None);
    (storage, store)
}

fn entry(title: &str, summary: &str) -> KnowledgeEntry {
    KnowledgeEntry::new(title, summary, KnowledgeSource::Manual)
}

#[tokio::test]
async fn add_and_search_by_keyword() {
    let (_storage, store) = fresh_store().await;
    store
        .add(&entry("sqlite wal mode", "wal allows concurrent readers"))
        .await
        .expect("add");
    store
        .add(&entry("gardening notes", "tomatoes need sun"))
        .await
        .expect("add");

    let results = store
        .search("sqlite", &KnowledgeSearchOptions::default())
        .await
        .expect("search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title, "sqlite wal mode");
}

#[tokio::test]
async fn search_escapes_fts_operators() {
    let (_storage, store) = fresh_store().await;
    store
        .add(&entry("plain entry", "nothing special"))
        .await
        .expect("add");

    // Would be an FTS5 syntax error without sanitisation.
    let results = store
        .search("plain OR NOT *", &KnowledgeSearchOptions::default())
        .await
        .expect("search should not error");
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn expired_entries_hidden_by_default() {
    let (_storage, store) = fresh_store().await;
    let mut expired = entry("old fact", "superseded by time");
    expired.expires_at = Some("2000-01-01 00:00:00".to_owned());
    store.add(&expired).await.expect("add");

    let hidden = store
        .search("fact", &KnowledgeSearchOptions::default())
        .await
        .expect("search");
    assert!(hidden.is_empty(), "expired rows are filtered by default");

    let shown = store
        .search(
            "fact",
            &KnowledgeSearchOptions {
                include_expired: true,
                ..KnowledgeSearchOptions::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(shown.len(), 1, "expired rows are kept, never deleted");
}

#[tokio::test]
async fn importance_weighting_prefers_important_rows() {
    let (_storage, store) = fresh_store().await;
    let mut minor = entry("deploy checklist alpha", "deploy steps for the small service");
    minor.importance = 0.1;
    store.add(&minor).await.expect("add");

    let mut major = entry("deploy checklist omega", "deploy steps for the main service");
    major.importance = 0.9;
    store.add(&major).await.expect("add");

    let weighted = store
        .search(
            "deploy checklist",
            &KnowledgeSearchOptions {
                weight_by_importance: true,
                ..KnowledgeSearchOptions::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(weighted.len(), 2);
    assert_eq!(
        weighted[0].title, "deploy checklist omega",
        "rank * (1 + importance) sorts important rows first"
    );
}

#[tokio::test]
async fn supersede_links_and_keeps_old_row() {
    let (_storage, store) = fresh_store().await;
    let old_id = store
        .add(&entry("api limit", "100 requests per minute"))
        .await
        .expect("add");

    let new_id = store
        .supersede(old_id, &entry("api limit", "1000 requests per minute"))
        .await
        .expect("supersede");
    assert_ne!(old_id, new_id);

    let old = store.get(old_id).await.expect("old row survives");
    assert_eq!(old.superseded_by, Some(new_id));

    let new = store.get(new_id).await.expect("new row exists");
    assert_eq!(new.superseded_by, None);
    assert_eq!(new.summary, "1000 requests per minute");
}

#[tokio::test]
async fn supersede_unknown_id_fails() {
    let (_storage, store) = fresh_store().await;
    let result = store.supersede(404, &entry("x", "y")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn verify_and_stats() {
    let (_storage, store) = fresh_store().await;
    let id = store.add(&entry("a", "b")).await.expect("add");
    let mut expired = entry("c", "d");
    expired.expires_at = Some("2000-01-01 00:00:00".to_owned());
    store.add(&expired).await.expect("add");

    store.verify(id).await.expect("verify");

    let stats = store.stats().await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.verified, 1);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.superseded, 0);
}
