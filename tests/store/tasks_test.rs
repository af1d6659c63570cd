//! Tests for `src/store/tasks.rs`.

use openclaw::store::tasks::{self, TaskStatus, TaskUpdate};
use openclaw::store::Storage;

async fn fresh() -> Storage {
    Storage::open_in_memory()
        .await
        .expect("in-memory storage should open")
}

#[tokio::test]
async fn create_and_get_task() {
    let storage = fresh().await;
    let id = tasks::create_task(storage.pool(), "write report", None, 2, None, &[])
        .await
        .expect("create");

    let task = tasks::get_task(storage.pool(), id).await.expect("get");
    assert_eq!(task.title, "write report");
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.priority, 2);
    assert!(task.completed_at.is_none());
}

#[tokio::test]
async fn create_task_rejects_bad_priority() {
    let storage = fresh().await;
    let result = tasks::create_task(storage.pool(), "x", None, 9, None, &[]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn update_rewrites_only_recognised_fields() {
    let storage = fresh().await;
    let id = tasks::create_task(storage.pool(), "original", Some("desc"), 3, None, &[])
        .await
        .expect("create");

    tasks::update_task(
        storage.pool(),
        id,
        &TaskUpdate {
            title: Some("renamed".to_owned()),
            ..TaskUpdate::default()
        },
    )
    .await
    .expect("update");

    let task = tasks::get_task(storage.pool(), id).await.expect("get");
    assert_eq!(task.title, "renamed");
    assert_eq!(task.description.as_deref(), Some("desc"), "untouched field survives");
    assert_eq!(task.status, TaskStatus::Todo);
}

#[tokio::test]
async fn done_sets_completed_at_and_logs_activity() {
    let storage = fresh().await;
    let id = tasks::create_task(storage.pool(), "finish it", None, 1, None, &[])
        .await
        .expect("create");

    tasks::update_task(
        storage.pool(),
        id,
        &TaskUpdate {
            status: Some(TaskStatus::Done),
            ..TaskUpdate::default()
        },
    )
    .await
    .expect("update");

    let task = tasks::get_task(storage.pool(), id).await.expect("get");
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.completed_at.is_some(), "done requires completed_at");

    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity WHERE action = 'task_completed' AND related_id = ?1",
    )
    .bind(format!("task:{id}"))
    .fetch_one(storage.pool())
    .await
    .expect("activity count");
    assert_eq!(count, 1, "completion is recorded in the same transaction");
}

#[tokio::test]
async fn list_filters_by_status_and_project() {
    let storage = fresh().await;
    let project = tasks::create_project(storage.pool(), "home", None)
        .await
        .expect("project");

    tasks::create_task(storage.pool(), "a", None, 3, Some(project), &[])
        .await
        .expect("task a");
    let b = tasks::create_task(storage.pool(), "b", None, 3, None, &[])
        .await
        .expect("task b");
    tasks::update_task(
        storage.pool(),
        b,
        &TaskUpdate {
            status: Some(TaskStatus::Done),
            ..TaskUpdate::default()
        },
    )
    .await
    .expect("update");

    let todo = tasks::list_tasks(storage.pool(), Some(TaskStatus::Todo), None, 10)
        .await
        .expect("list");
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].title, "a");

    let in_project = tasks::list_tasks(storage.pool(), None, Some(project), 10)
        .await
        .expect("list");
    assert_eq!(in_project.len(), 1);
    assert_eq!(in_project[0].title, "a");
}

#[tokio::test]
async fn tags_round_trip_as_json() {
    let storage = fresh().await;
    let tags = vec!["deep".to_owned(), "work".to_owned()];
    let id = tasks::create_task(storage.pool(), "tagged", None, 3, None, &tags)
        .await
        .expect("create");
    let task = tasks::get_task(storage.pool(), id).await.expect("get");
    assert_eq!(task.tags, tags);
}

#[tokio::test]
async fn project_status_changes() {
    let storage = fresh().await;
    let id = tasks::create_project(storage.pool(), "side quest", None)
        .await
        .expect("create");
    tasks::set_project_status(storage.pool(), id, tasks::ProjectStatus::Paused)
        .await
        .expect("pause");
    let project = tasks::get_project(storage.pool(), id).await.expect("get");
    assert_eq!(project.status, tasks::ProjectStatus::Paused);
}
