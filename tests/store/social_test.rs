//! Tests for `src/store/social.rs` duplicate detection.

use openclaw::store::social;
use openclaw::store::Storage;

async fn fresh() -> Storage {
    Storage::open_in_memory()
        .await
        .expect("in-memory storage should open")
}

#[tokio::test]
async fn identical_post_is_duplicate_at_threshold_one() {
    let storage = fresh().await;
    social::add_post(storage.pool(), "x", "Shipping the new indexing engine today")
        .await
        .expect("post");

    let check = social::check_duplicate(
        storage.pool(),
        "x",
        "Shipping the new indexing engine today",
        1.0,
    )
    .await
    .expect("check");
    assert!(check.is_duplicate);
    assert!((check.similarity - 1.0).abs() < 1e-12);
    assert!(check.matched_post.is_some());
}

#[tokio::test]
async fn reworded_post_is_not_duplicate_at_threshold_one() {
    let storage = fresh().await;
    social::add_post(storage.pool(), "x", "Shipping the new indexing engine today")
        .await
        .expect("post");

    let check = social::check_duplicate(
        storage.pool(),
        "x",
        "Shipping the new indexing engine tomorrow morning",
        1.0,
    )
    .await
    .expect("check");
    assert!(!check.is_duplicate, "threshold 1.0 requires identical word sets");
}

#[tokio::test]
async fn near_duplicate_detected_at_default_threshold() {
    let storage = fresh().await;
    social::add_post(
        storage.pool(),
        "x",
        "Excited about hybrid search with reciprocal rank fusion",
    )
    .await
    .expect("post");

    let check = social::check_duplicate(
        storage.pool(),
        "x",
        "Really excited about hybrid search with reciprocal rank fusion",
        social::DEFAULT_DUPLICATE_THRESHOLD,
    )
    .await
    .expect("check");
    assert!(check.is_duplicate);
    assert!(check.similarity >= social::DEFAULT_DUPLICATE_THRESHOLD);
}

#[tokio::test]
async fn unrelated_post_is_clean() {
    let storage = fresh().await;
    social::add_post(storage.pool(), "x", "Morning run along the river felt great")
        .await
        .expect("post");

    let check = social::check_duplicate(
        storage.pool(),
        "x",
        "Database migrations should always be idempotent",
        social::DEFAULT_DUPLICATE_THRESHOLD,
    )
    .await
    .expect("check");
    assert!(!check.is_duplicate);
    assert!(check.matched_post.is_none());
}

#[tokio::test]
async fn other_platforms_are_ignored() {
    let storage = fresh().await;
    social::add_post(storage.pool(), "linkedin", "Same exact content here")
        .await
        .expect("post");

    let check =
        social::check_duplicate(storage.pool(), "x", "Same exact content here", 0.5)
            .await
            .expect("check");
    assert!(!check.is_duplicate, "history is per-platform");
}

#[tokio::test]
async fn empty_history_is_never_duplicate() {
    let storage = fresh().await;
    let check = social::check_duplicate(storage.pool(), "x", "anything at all", 0.1)
        .await
        .expect("check");
    assert!(!check.is_duplicate);
    assert_eq!(check.similarity, 0.0);
}
