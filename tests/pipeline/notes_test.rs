//! Tests for pipeline sub-tasks and notes.

use openclaw::pipeline::{CreatePipeline, NoteType, PipelineEngine, TaskStatus};
use openclaw::store::Storage;

async fn fresh() -> (Storage, PipelineEngine) {
    let storage = Storage::open_in_memory()
        .await
        .expect("in-memory storage should open");
    let engine = PipelineEngine::new(storage.pool().clone());
    (storage, engine)
}

#[tokio::test]
async fn tasks_lifecycle() {
    let (_storage, engine) = fresh().await;
    let item = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");

    let t1 = engine
        .add_task(item, "write the parser", None, Some("developer"))
        .await
        .expect("t1");
    engine
        .add_task(item, "write the tests", None, None)
        .await
        .expect("t2");

    let tasks = engine.tasks(item).await.expect("tasks");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].status, TaskStatus::Todo);

    engine
        .update_task(t1, Some(TaskStatus::Done), Some("parser merged"), None)
        .await
        .expect("update");

    let tasks = engine.tasks(item).await.expect("tasks");
    let done = tasks.iter().find(|t| t.id == t1).expect("t1");
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.output.as_deref(), Some("parser merged"));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn task_for_unknown_item_fails() {
    let (_storage, engine) = fresh().await;
    assert!(engine.add_task(404, "x", None, None).await.is_err());
    assert!(engine
        .update_task(404, Some(TaskStatus::Done), None, None)
        .await
        .is_err());
}

#[tokio::test]
async fn notes_are_append_only_and_ordered() {
    let (_storage, engine) = fresh().await;
    let item = engine
        .create(&CreatePipeline::feature("f"))
        .await
        .expect("create");

    engine
        .add_note(item, "developer", NoteType::Started, "picking this up")
        .await
        .expect("n1");
    engine
        .add_note(item, "developer", NoteType::Blocker, "missing API key")
        .await
        .expect("n2");
    engine
        .add_note(item, "qa", NoteType::Decision, "ship behind a flag")
        .await
        .expect("n3");

    let notes = engine.notes(item).await.expect("notes");
    assert_eq!(notes.len(), 3);
    assert_eq!(notes[0].note_type, NoteType::Started);
    assert_eq!(notes[1].note_type, NoteType::Blocker);
    assert_eq!(notes[2].agent_role, "qa");
}

#[tokio::test]
async fn note_for_unknown_item_fails() {
    let (_storage, engine) = fresh().await;
    assert!(engine
        .add_note(404, "qa", NoteType::Info, "x")
        .await
        .is_err());
}
