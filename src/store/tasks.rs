//! Projects and personal tasks.

use sqlx::SqlitePool;

use crate::activity::{self, ActivityRecord, RelatedId};
use crate::errors::{CoreError, CoreResult};

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Not started.
    Todo,
    /// Being worked on.
    InProgress,
    /// Waiting on something.
    Blocked,
    /// Finished.
    Done,
    /// Abandoned.
    Cancelled,
}

impl TaskStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Validation(format!(
                "invalid task status: {other:?}"
            ))),
        }
    }
}

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    /// In flight.
    Active,
    /// Temporarily parked.
    Paused,
    /// Finished.
    Completed,
    /// Kept for history only.
    Archived,
}

impl ProjectStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(CoreError::Validation(format!(
                "invalid project status: {other:?}"
            ))),
        }
    }
}

/// A stored task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Row id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Longer description.
    pub description: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Priority 1 (highest) to 4.
    pub priority: i64,
    /// Owning project.
    pub project_id: Option<i64>,
    /// Due date, ISO-8601.
    pub due_date: Option<String>,
    /// Set when status reached done.
    pub completed_at: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// Partial update for [`update_task`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<i64>,
    /// New owning project.
    pub project_id: Option<i64>,
    /// New due date.
    pub due_date: Option<String>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
}

type TaskTuple = (
    i64,
    String,
    Option<String>,
    String,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
);

const TASK_COLUMNS: &str =
    "id, title, description, status, priority, project_id, due_date, completed_at, tags";

/// Create a task.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] for an out-of-range priority, storage
/// errors otherwise.
pub async fn create_task(
    pool: &SqlitePool,
    title: &str,
    description: Option<&str>,
    priority: i64,
    project_id: Option<i64>,
    tags: &[String],
) -> CoreResult<i64> {
    if !(1..=4).contains(&priority) {
        return Err(CoreError::Validation(format!(
            "priority {priority} outside 1-4"
        )));
    }
    let tags_json = serde_json::to_string(tags)?;
    let result = sqlx::query(
        "INSERT INTO tasks (title, description, priority, project_id, tags) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(project_id)
    .bind(tags_json)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Fetch one task by id.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the id does not exist.
pub async fn get_task(pool: &SqlitePool, id: i64) -> CoreResult<TaskRecord> {
    let row: Option<TaskTuple> =
        sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(task_from_tuple)
        .transpose()?
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
}

/// List tasks, optionally filtered by status and project.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn list_tasks(
    pool: &SqlitePool,
    status: Option<TaskStatus>,
    project_id: Option<i64>,
    limit: usize,
) -> CoreResult<Vec<TaskRecord>> {
    let rows: Vec<TaskTuple> = sqlx::query_as(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks \
         WHERE (?1 IS NULL OR status = ?1) \
           AND (?2 IS NULL OR project_id = ?2) \
         ORDER BY priority ASC, id ASC LIMIT ?3"
    ))
    .bind(status.map(|s| s.as_str()))
    .bind(project_id)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(task_from_tuple).collect()
}

/// Apply a partial update; only recognised fields are rewritten and
/// `updated_at` is always refreshed.
///
/// A transition to done sets `completed_at` and appends a completion
/// activity row in the same transaction.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the id does not exist.
pub async fn update_task(pool: &SqlitePool, id: i64, updates: &TaskUpdate) -> CoreResult<()> {
    let current = get_task(pool, id).await?;

    let mut tx = pool.begin().await?;

    let tags_json = updates
        .tags
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let becoming_done = matches!(updates.status, Some(TaskStatus::Done))
        && current.status != TaskStatus::Done;

    sqlx::query(
        "UPDATE tasks SET \
         title = coalesce(?1, title), \
         description = coalesce(?2, description), \
         status = coalesce(?3, status), \
         priority = coalesce(?4, priority), \
         project_id = coalesce(?5, project_id), \
         due_date = coalesce(?6, due_date), \
         tags = coalesce(?7, tags), \
         completed_at = CASE WHEN ?8 THEN datetime('now') ELSE completed_at END, \
         updated_at = datetime('now') \
         WHERE id = ?9",
    )
    .bind(&updates.title)
    .bind(&updates.description)
    .bind(updates.status.map(|s| s.as_str()))
    .bind(updates.priority)
    .bind(updates.project_id)
    .bind(&updates.due_date)
    .bind(&tags_json)
    .bind(becoming_done)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if becoming_done {
        activity::append_tx(
            &mut tx,
            &ActivityRecord {
                action: "task_completed".to_owned(),
                category: Some("tasks".to_owned()),
                description: Some(current.title.clone()),
                related_id: Some(RelatedId::new("task", id).to_string()),
                ..ActivityRecord::default()
            },
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn task_from_tuple(row: TaskTuple) -> CoreResult<TaskRecord> {
    let (id, title, description, status, priority, project_id, due_date, completed_at, tags) = row;
    Ok(TaskRecord {
        id,
        title,
        description,
        status: TaskStatus::parse(&status)?,
        priority,
        project_id,
        due_date,
        completed_at,
        tags: serde_json::from_str(&tags)
            .map_err(|e| CoreError::Parse(format!("task tags: {e}")))?,
    })
}

// ── Projects ────────────────────────────────────────────────────

/// A stored project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    /// Row id.
    pub id: i64,
    /// Name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: ProjectStatus,
}

/// Create a project.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn create_project(
    pool: &SqlitePool,
    name: &str,
    description: Option<&str>,
) -> CoreResult<i64> {
    let result = sqlx::query("INSERT INTO projects (name, description) VALUES (?1, ?2)")
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Fetch one project by id.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the id does not exist.
pub async fn get_project(pool: &SqlitePool, id: i64) -> CoreResult<ProjectRecord> {
    let row: Option<(i64, String, Option<String>, String)> =
        sqlx::query_as("SELECT id, name, description, status FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    let (id, name, description, status) =
        row.ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;
    Ok(ProjectRecord {
        id,
        name,
        description,
        status: ProjectStatus::parse(&status)?,
    })
}

/// Change a project's lifecycle status.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the id does not exist.
pub async fn set_project_status(
    pool: &SqlitePool,
    id: i64,
    status: ProjectStatus,
) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE projects SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
    )
    .bind(status.as_str())
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("project {id}")));
    }
    Ok(())
}
