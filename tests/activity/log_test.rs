//! Tests for the activity log query surface.

use openclaw::activity::{ActivityFilter, ActivityLog, ActivityRecord, Period, RelatedId};
use openclaw::store::Storage;

async fn fresh() -> (Storage, ActivityLog) {
    let storage = Storage::open_in_memory()
        .await
        .expect("in-memory storage should open");
    let log = ActivityLog::new(storage.pool().clone());
    (storage, log)
}

#[tokio::test]
async fn log_and_get_recent() {
    let (_storage, log) = fresh().await;
    log.log("task_started", "began work", Some("tasks"), Some("main"), None)
        .await
        .expect("log");
    log.log("task_completed", "finished work", Some("tasks"), Some("main"), None)
        .await
        .expect("log");

    let rows = log
        .get_recent(10, &ActivityFilter::default())
        .await
        .expect("recent");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].action, "task_completed", "newest first");
}

#[tokio::test]
async fn get_recent_filters_by_source_and_related() {
    let (_storage, log) = fresh().await;
    let related = RelatedId::new("pipeline", 7);
    log.log("a", "from main", None, Some("main"), None)
        .await
        .expect("log");
    log.log("b", "from subagent", None, Some("subagent"), Some(&related))
        .await
        .expect("log");

    let by_source = log
        .get_recent(
            10,
            &ActivityFilter {
                source: Some("subagent".to_owned()),
                related_id: None,
            },
        )
        .await
        .expect("recent");
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].action, "b");

    let by_related = log
        .get_recent(
            10,
            &ActivityFilter {
                source: None,
                related_id: Some("pipeline:7".to_owned()),
            },
        )
        .await
        .expect("recent");
    assert_eq!(by_related.len(), 1);
    assert_eq!(by_related[0].related_id.as_deref(), Some("pipeline:7"));
}

#[tokio::test]
async fn get_by_category_and_action() {
    let (_storage, log) = fresh().await;
    log.log("x", "one", Some("pipeline"), None, None)
        .await
        .expect("log");
    log.log("x", "two", Some("recall"), None, None)
        .await
        .expect("log");
    log.log("y", "three", Some("recall"), None, None)
        .await
        .expect("log");

    let recall_rows = log.get_by_category("recall", 10).await.expect("category");
    assert_eq!(recall_rows.len(), 2);

    let x_rows = log.get_by_action("x", 10).await.expect("action");
    assert_eq!(x_rows.len(), 2);
}

#[tokio::test]
async fn metadata_round_trips_as_json() {
    let (_storage, log) = fresh().await;
    log.log_full(ActivityRecord {
        action: "pipeline_stage_changed".to_owned(),
        category: Some("pipeline".to_owned()),
        metadata: Some(serde_json::json!({"from": "idea", "to": "spec"})),
        ..ActivityRecord::default()
    })
    .await
    .expect("log");

    let rows = log
        .get_by_action("pipeline_stage_changed", 1)
        .await
        .expect("rows");
    let metadata = rows[0].metadata.as_ref().expect("metadata");
    assert_eq!(metadata["from"], "idea");
    assert_eq!(metadata["to"], "spec");
}

#[tokio::test]
async fn stats_and_digest_group_by_category() {
    let (_storage, log) = fresh().await;
    for _ in 0..3 {
        log.log("a", "x", Some("pipeline"), None, None)
            .await
            .expect("log");
    }
    log.log("b", "y", Some("recall"), None, None)
        .await
        .expect("log");

    let stats = log.get_stats(Period::Day).await.expect("stats");
    assert_eq!(stats[0].category, "pipeline");
    assert_eq!(stats[0].count, 3);

    let digest = log.get_digest(Period::Week, 5).await.expect("digest");
    assert_eq!(digest.len(), 2);
    assert!(digest[0].first_at <= digest[0].last_at);
}

#[tokio::test]
async fn get_by_date_bounds() {
    let (_storage, log) = fresh().await;
    log.log("a", "x", None, None, None).await.expect("log");

    let all = log
        .get_by_date("1970-01-01", "9999-12-31", 10)
        .await
        .expect("rows");
    assert_eq!(all.len(), 1);

    let none = log
        .get_by_date("9998-01-01", "9999-12-31", 10)
        .await
        .expect("rows");
    assert!(none.is_empty());
}
