//! Tests for ambient-context auto-logging.

use openclaw::activity::{autolog, ActivityFilter, ActivityLog, RelatedId};
use openclaw::store::Storage;

async fn fresh() -> (Storage, ActivityLog) {
    let storage = Storage::open_in_memory()
        .await
        .expect("in-memory storage should open");
    let log = ActivityLog::new(storage.pool().clone());
    (storage, log)
}

#[tokio::test]
async fn log_tool_inherits_scope_context() {
    let (_storage, log) = fresh().await;
    let related = RelatedId::new("pipeline", 25);

    autolog::with_context(log.clone(), Some("subagent"), Some(&related), async {
        autolog::log_tool("web_search", "looked something up", None).await;
    })
    .await;

    let rows = log
        .get_recent(10, &ActivityFilter::default())
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, "tool_web_search");
    assert_eq!(rows[0].source.as_deref(), Some("subagent"));
    assert_eq!(rows[0].related_id.as_deref(), Some("pipeline:25"));
}

#[tokio::test]
async fn log_tool_outside_scope_is_a_no_op() {
    let (_storage, log) = fresh().await;

    autolog::log_tool("orphan_tool", "no scope here", None).await;

    let rows = log
        .get_recent(10, &ActivityFilter::default())
        .await
        .expect("rows");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn nested_tasks_do_not_share_context() {
    let (_storage, log) = fresh().await;

    autolog::with_context(log.clone(), Some("main"), None, async {
        // A spawned task has its own (absent) context.
        let handle = tokio::spawn(async {
            autolog::log_tool("from_spawned_task", "should be dropped", None).await;
        });
        handle.await.expect("join");

        autolog::log_tool("from_scope", "kept", None).await;
    })
    .await;

    let rows = log
        .get_recent(10, &ActivityFilter::default())
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, "tool_from_scope");
}

#[tokio::test]
async fn wrap_async_records_success_and_duration() {
    let (_storage, log) = fresh().await;

    let result: Result<i32, &str> =
        autolog::with_context(log.clone(), Some("main"), None, async {
            autolog::wrap_async("adder", async { Ok(41 + 1) }).await
        })
        .await;
    assert_eq!(result.expect("ok"), 42);

    let rows = log.get_by_action("tool_adder", 1).await.expect("rows");
    let metadata = rows[0].metadata.as_ref().expect("metadata");
    assert_eq!(metadata["success"], true);
    assert!(metadata["duration_ms"].as_i64().expect("duration") >= 0);
}

#[tokio::test]
async fn wrap_async_passes_errors_through_and_still_logs() {
    let (_storage, log) = fresh().await;

    let result: Result<(), String> =
        autolog::with_context(log.clone(), Some("main"), None, async {
            autolog::wrap_async("failing_tool", async { Err("boom".to_owned()) }).await
        })
        .await;
    assert!(result.is_err());

    let rows = log
        .get_by_action("tool_failing_tool", 1)
        .await
        .expect("rows");
    let metadata = rows[0].metadata.as_ref().expect("metadata");
    assert_eq!(metadata["success"], false);
}
