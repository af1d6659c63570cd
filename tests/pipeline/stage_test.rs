//! Tests for the pipeline state machine and its activity coupling.

use openclaw::pipeline::{
    CreatePipeline, ItemType, PipelineEngine, PipelineFilter, PipelineUpdate,
};
use openclaw::store::Storage;

async fn fresh() -> (Storage, PipelineEngine) {
    let storage = Storage::open_in_memory()
        .await
        .expect("in-memory storage should open");
    let engine = PipelineEngine::new(storage.pool().clone());
    (storage, engine)
}

#[tokio::test]
async fn create_starts_in_initial_stage() {
    let (_storage, engine) = fresh().await;
    let id = engine
        .create(&CreatePipeline::feature("dark mode"))
        .await
        .expect("create");
    let item = engine.get(id).await.expect("get");
    assert_eq!(item.stage, "idea");
    assert_eq!(item.item_type, ItemType::Feature);

    let story = engine
        .create(&CreatePipeline::story("toggle switch", id))
        .await
        .expect("create story");
    assert_eq!(engine.get(story).await.expect("get").stage, "backlog");
}

#[tokio::test]
async fn stage_change_appends_activity_atomically() {
    let (storage, engine) = fresh().await;
    let id = engine
        .create(&CreatePipeline::feature("X"))
        .await
        .expect("create");

    let item = engine
        .update(
            id,
            &PipelineUpdate {
                stage: Some("spec".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect("update");
    assert_eq!(item.stage, "spec");

    let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT action, metadata, related_id, source FROM activity \
         WHERE action = 'pipeline_stage_changed'",
    )
    .fetch_all(storage.pool())
    .await
    .expect("activity rows");
    assert_eq!(rows.len(), 1);

    let (_, metadata, related_id, source) = &rows[0];
    assert_eq!(related_id.as_deref(), Some(format!("pipeline:{id}").as_str()));
    assert_eq!(source.as_deref(), Some("main"));
    let metadata: serde_json::Value =
        serde_json::from_str(metadata.as_deref().expect("metadata")).expect("json");
    assert_eq!(metadata["from"], "idea");
    assert_eq!(metadata["to"], "spec");
    assert_eq!(metadata["title"], "X");
}

#[tokio::test]
async fn invalid_stage_for_type_mutates_nothing() {
    let (storage, engine) = fresh().await;
    let id = engine
        .create(&CreatePipeline {
            item_type: ItemType::Story,
            parent_id: None,
            ..CreatePipeline::feature("lone story")
        })
        .await
        .expect("create");

    let err = engine
        .update(
            id,
            &PipelineUpdate {
                stage: Some("live".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect_err("live is not a story stage");

    let message = err.to_string();
    for stage in ["backlog", "in-progress", "qa", "done", "blocked"] {
        assert!(message.contains(stage), "error quotes the valid set: {message}");
    }

    let item = engine.get(id).await.expect("get");
    assert_eq!(item.stage, "backlog", "row unchanged");

    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity WHERE action = 'pipeline_stage_changed'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("count");
    assert_eq!(count, 0, "no activity emitted");
}

#[tokio::test]
async fn same_stage_transition_is_a_no_op() {
    let (storage, engine) = fresh().await;
    let id = engine
        .create(&CreatePipeline::feature("idempotent"))
        .await
        .expect("create");

    engine
        .update(
            id,
            &PipelineUpdate {
                stage: Some("idea".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect("same-stage update succeeds");

    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity WHERE action = 'pipeline_stage_changed'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn backward_transitions_rejected_blocked_allowed() {
    let (_storage, engine) = fresh().await;
    let feature = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");
    let story = engine
        .create(&CreatePipeline::story("s", feature))
        .await
        .expect("create");

    let move_to = |stage: &str| PipelineUpdate {
        stage: Some(stage.to_owned()),
        ..PipelineUpdate::default()
    };

    engine.update(story, &move_to("qa"), "main").await.expect("forward");
    assert!(engine.update(story, &move_to("backlog"), "main").await.is_err());

    engine
        .update(story, &move_to("blocked"), "main")
        .await
        .expect("into blocked from anywhere");
    engine
        .update(story, &move_to("in-progress"), "main")
        .await
        .expect("out of blocked to any stage");
}

#[tokio::test]
async fn terminal_stage_sets_completed_at() {
    let (_storage, engine) = fresh().await;
    let feature = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");
    let story = engine
        .create(&CreatePipeline::story("s", feature))
        .await
        .expect("create");

    let done = engine
        .update(
            story,
            &PipelineUpdate {
                stage: Some("done".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect("update");
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn parent_must_be_feature_and_child_a_story() {
    let (_storage, engine) = fresh().await;
    let feature = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");
    let story = engine
        .create(&CreatePipeline::story("s", feature))
        .await
        .expect("create");

    // Story as parent: rejected.
    assert!(engine
        .create(&CreatePipeline::story("grandchild", story))
        .await
        .is_err());

    // Non-story child of a feature: rejected.
    let bad_child = CreatePipeline {
        item_type: ItemType::Risk,
        parent_id: Some(feature),
        ..CreatePipeline::feature("not a story")
    };
    assert!(engine.create(&bad_child).await.is_err());
}

#[tokio::test]
async fn approve_sets_legacy_ready_stage() {
    let (storage, engine) = fresh().await;
    let id = engine
        .create(&CreatePipeline::feature("approved thing"))
        .await
        .expect("create");

    engine.approve(id, "operator").await.expect("approve");

    let item = engine.get(id).await.expect("get");
    assert_eq!(item.stage, "ready");
    assert_eq!(item.approved_by.as_deref(), Some("operator"));
    assert!(item.approved_at.is_some());

    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity WHERE action = 'pipeline_stage_changed'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("count");
    assert_eq!(count, 1, "approval records the stage transition");

    // Legacy stage only validates the target on the next move.
    engine
        .update(
            id,
            &PipelineUpdate {
                stage: Some("building".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect("ready -> building");
}

#[tokio::test]
async fn list_excludes_done_and_live_by_default() {
    let (_storage, engine) = fresh().await;
    let a = engine.create(&CreatePipeline::feature("a")).await.expect("a");
    let feature_b = engine.create(&CreatePipeline::feature("b")).await.expect("b");
    let story = engine
        .create(&CreatePipeline::story("s", feature_b))
        .await
        .expect("s");

    let move_to = |stage: &str| PipelineUpdate {
        stage: Some(stage.to_owned()),
        ..PipelineUpdate::default()
    };
    engine.update(story, &move_to("done"), "main").await.expect("done");
    engine
        .update(a, &move_to("building"), "main")
        .await
        .expect("building");

    let visible = engine.list(&PipelineFilter::default()).await.expect("list");
    assert!(visible.iter().all(|i| i.stage != "done" && i.stage != "live"));
    assert_eq!(visible.len(), 2, "feature a + feature b remain");

    let done_only = engine
        .list(&PipelineFilter {
            stage: Some("done".to_owned()),
            ..PipelineFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(done_only.len(), 1);
}

#[tokio::test]
async fn children_ordered_by_priority_then_creation() {
    let (_storage, engine) = fresh().await;
    let feature = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");

    let mut low = CreatePipeline::story("later", feature);
    low.priority = 4;
    engine.create(&low).await.expect("low");
    let mut urgent = CreatePipeline::story("first", feature);
    urgent.priority = 1;
    engine.create(&urgent).await.expect("urgent");
    let mut second = CreatePipeline::story("second", feature);
    second.priority = 1;
    engine.create(&second).await.expect("second");

    let children = engine.children(feature).await.expect("children");
    assert_eq!(children.len(), 3);
    assert_eq!(children[0].title, "first");
    assert_eq!(children[1].title, "second");
    assert_eq!(children[2].title, "later");
}

#[tokio::test]
async fn story_stats_rolls_up_by_stage() {
    let (_storage, engine) = fresh().await;
    let feature = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");
    let s1 = engine
        .create(&CreatePipeline::story("s1", feature))
        .await
        .expect("s1");
    engine
        .create(&CreatePipeline::story("s2", feature))
        .await
        .expect("s2");

    engine
        .update(
            s1,
            &PipelineUpdate {
                stage: Some("done".to_owned()),
                ..PipelineUpdate::default()
            },
            "main",
        )
        .await
        .expect("done");

    let stats = engine.story_stats(feature).await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.done, 1);
    assert_eq!(stats.by_stage.get("backlog"), Some(&1));
    assert_eq!(stats.by_stage.get("done"), Some(&1));
}
