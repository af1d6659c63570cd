//! Dev pipeline: a typed state machine over work items.
//!
//! Features, stories, risks, issues, assumptions, and dependencies move
//! through per-type stage machines ([`stages`]). Every committed stage
//! change appends a `pipeline_stage_changed` activity row in the same
//! transaction. Stories roll up under parent features; advisory
//! auto-transitions (first story starts → feature builds, all stories done
//! → feature live) are opt-in.

pub mod stages;

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::activity::{self, ActivityRecord, RelatedId};
use crate::errors::{CoreError, CoreResult};

pub use self::stages::{valid_stages, ItemType};

/// A pipeline work item.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineItem {
    /// Row id.
    pub id: i64,
    /// Item type.
    pub item_type: ItemType,
    /// Parent feature, for stories.
    pub parent_id: Option<i64>,
    /// Owning project.
    pub project_id: Option<i64>,
    /// Title.
    pub title: String,
    /// Longer description.
    pub description: Option<String>,
    /// Current stage.
    pub stage: String,
    /// Spec document text.
    pub spec_doc: Option<String>,
    /// Acceptance criteria.
    pub acceptance_criteria: Vec<String>,
    /// Who approved the spec.
    pub approved_by: Option<String>,
    /// When the spec was approved.
    pub approved_at: Option<String>,
    /// Working branch.
    pub branch_name: Option<String>,
    /// Review notes.
    pub review_notes: Option<String>,
    /// Whether review passed.
    pub review_passed: bool,
    /// Latest health-check payload.
    pub health_check: Option<Value>,
    /// Priority 1 (highest) to 4.
    pub priority: i64,
    /// Agent assigned to work the item.
    pub assigned_agent: Option<String>,
    /// Human assignee.
    pub assigned_to: Option<String>,
    /// When work started.
    pub started_at: Option<String>,
    /// When the item reached a terminal stage.
    pub completed_at: Option<String>,
}

/// Inputs for [`PipelineEngine::create`].
#[derive(Debug, Clone)]
pub struct CreatePipeline {
    /// Item type (default feature).
    pub item_type: ItemType,
    /// Owning project.
    pub project_id: Option<i64>,
    /// Parent feature id, for stories.
    pub parent_id: Option<i64>,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Priority 1–4.
    pub priority: i64,
    /// Acceptance criteria.
    pub acceptance_criteria: Vec<String>,
}

impl CreatePipeline {
    /// A feature with defaults.
    pub fn feature(title: &str) -> Self {
        Self {
            item_type: ItemType::Feature,
            project_id: None,
            parent_id: None,
            title: title.to_owned(),
            description: None,
            priority: 3,
            acceptance_criteria: Vec::new(),
        }
    }

    /// A story under a parent feature.
    pub fn story(title: &str, parent_id: i64) -> Self {
        Self {
            item_type: ItemType::Story,
            parent_id: Some(parent_id),
            ..Self::feature(title)
        }
    }
}

/// Partial update for [`PipelineEngine::update`]. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct PipelineUpdate {
    /// New stage (validated against the item's type).
    pub stage: Option<String>,
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New spec document.
    pub spec_doc: Option<String>,
    /// Replacement acceptance criteria.
    pub acceptance_criteria: Option<Vec<String>>,
    /// New branch name.
    pub branch_name: Option<String>,
    /// New review notes.
    pub review_notes: Option<String>,
    /// Review verdict.
    pub review_passed: Option<bool>,
    /// Health-check payload.
    pub health_check: Option<Value>,
    /// New priority.
    pub priority: Option<i64>,
    /// New agent assignment.
    pub assigned_agent: Option<String>,
    /// New human assignment.
    pub assigned_to: Option<String>,
}

/// Filters for [`PipelineEngine::list`].
#[derive(Debug, Clone, Default)]
pub struct PipelineFilter {
    /// Only items in this project.
    pub project_id: Option<i64>,
    /// Only children of this feature.
    pub parent_id: Option<i64>,
    /// Only items in this stage; when absent, `done` and `live` are
    /// excluded.
    pub stage: Option<String>,
    /// Only items of this type.
    pub item_type: Option<ItemType>,
    /// Maximum rows.
    pub limit: usize,
}

/// Rollup stats for a feature's stories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryStats {
    /// All child stories.
    pub total: i64,
    /// Stories in `done`.
    pub done: i64,
    /// Count per stage.
    pub by_stage: BTreeMap<String, i64>,
}

/// Status of a pipeline sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Not started.
    Todo,
    /// In progress.
    Doing,
    /// Finished.
    Done,
    /// Stuck.
    Blocked,
}

impl TaskStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Blocked => "blocked",
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
            "doing" => Ok(Self::Doing),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            other => Err(CoreError::Validation(format!(
                "invalid pipeline task status: {other:?}"
            ))),
        }
    }
}

/// A pipeline sub-task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTask {
    /// Row id.
    pub id: i64,
    /// Owning pipeline item.
    pub pipeline_id: i64,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Status.
    pub status: TaskStatus,
    /// Assignee.
    pub assigned_to: Option<String>,
    /// Work product captured on completion.
    pub output: Option<String>,
    /// When the task was finished.
    pub completed_at: Option<String>,
}

/// Kind of pipeline note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteType {
    /// Handover between agents.
    Handover,
    /// Something is in the way.
    Blocker,
    /// An open question.
    Question,
    /// A decision taken.
    Decision,
    /// General information.
    Info,
    /// Work started.
    Started,
    /// Progress update.
    Progress,
    /// Work complete.
    Complete,
}

impl NoteType {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handover => "handover",
            Self::Blocker => "blocker",
            Self::Question => "question",
            Self::Decision => "decision",
            Self::Info => "info",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Complete => "complete",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "handover" => Ok(Self::Handover),
            "blocker" => Ok(Self::Blocker),
            "question" => Ok(Self::Question),
            "decision" => Ok(Self::Decision),
            "info" => Ok(Self::Info),
            "started" => Ok(Self::Started),
            "progress" => Ok(Self::Progress),
            "complete" => Ok(Self::Complete),
            other => Err(CoreError::Validation(format!(
                "invalid note type: {other:?}"
            ))),
        }
    }
}

/// An append-only pipeline note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineNote {
    /// Row id.
    pub id: i64,
    /// Owning pipeline item.
    pub pipeline_id: i64,
    /// Role of the agent that wrote the note.
    pub agent_role: String,
    /// Note kind.
    pub note_type: NoteType,
    /// Note body.
    pub content: String,
    /// When the note was written.
    pub created_at: String,
}

const ITEM_COLUMNS: &str = "id, type, parent_id, project_id, title, description, stage, \
                            spec_doc, acceptance_criteria, approved_by, approved_at, \
                            branch_name, review_notes, review_passed, health_check, \
                            priority, assigned_agent, assigned_to, started_at, completed_at";

/// The pipeline state machine over SQLite.
pub struct PipelineEngine {
    pool: SqlitePool,
    auto_rollup: bool,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("auto_rollup", &self.auto_rollup)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Create an engine with advisory rollup disabled.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            auto_rollup: false,
        }
    }

    /// Enable or disable advisory story→feature rollup.
    pub fn with_auto_rollup(mut self, enabled: bool) -> Self {
        self.auto_rollup = enabled;
        self
    }

    /// Create a work item in its type's initial stage.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when the priority is out of range,
    /// the parent is not a feature, or a parented item is not a story.
    pub async fn create(&self, req: &CreatePipeline) -> CoreResult<i64> {
        if !(1..=4).contains(&req.priority) {
            return Err(CoreError::Validation(format!(
                "priority {} outside 1-4",
                req.priority
            )));
        }

        if let Some(parent_id) = req.parent_id {
            let parent = self.get(parent_id).await?;
            if parent.item_type != ItemType::Feature {
                return Err(CoreError::Validation(format!(
                    "parent {parent_id} is a {}, only features can have children",
                    parent.item_type.as_str()
                )));
            }
            if req.item_type != ItemType::Story {
                return Err(CoreError::Validation(format!(
                    "child items must be stories, got {}",
                    req.item_type.as_str()
                )));
            }
        }

        let criteria = serde_json::to_string(&req.acceptance_criteria)?;
        let result = sqlx::query(
            "INSERT INTO pipeline (type, parent_id, project_id, title, description, \
             stage, acceptance_criteria, priority) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(req.item_type.as_str())
        .bind(req.parent_id)
        .bind(req.project_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(stages::initial_stage(req.item_type))
        .bind(criteria)
        .bind(req.priority)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, item_type = req.item_type.as_str(), "pipeline item created");
        Ok(id)
    }

    /// Fetch one item by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn get(&self, id: i64) -> CoreResult<PipelineItem> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM pipeline WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| item_from_row(&r))
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("pipeline item {id}")))
    }

    /// Apply a partial update atomically.
    ///
    /// A stage change is validated against the item's type, recorded with a
    /// `pipeline_stage_changed` activity row in the same transaction, and
    /// maintains `started_at`/`completed_at`. A same-stage "transition" is
    /// a no-op and appends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for invalid stages and
    /// [`CoreError::NotFound`] for unknown ids; nothing is mutated on error.
    pub async fn update(
        &self,
        id: i64,
        updates: &PipelineUpdate,
        source: &str,
    ) -> CoreResult<PipelineItem> {
        let current = self.get(id).await?;

        // Validate before opening the transaction so a bad stage mutates
        // nothing.
        let stage_change: Option<&str> = match &updates.stage {
            Some(new_stage) if *new_stage != current.stage => {
                stages::validate_transition(current.item_type, &current.stage, new_stage)?;
                Some(new_stage.as_str())
            }
            _ => None,
        };

        let criteria = updates
            .acceptance_criteria
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let health_check = updates.health_check.as_ref().map(Value::to_string);

        let mut tx = self.pool.begin().await?;

        let entering_terminal = stage_change.is_some_and(stages::is_terminal_stage);
        let leaving_initial =
            stage_change.is_some() && current.stage == stages::initial_stage(current.item_type);

        sqlx::query(
            "UPDATE pipeline SET \
             stage = coalesce(?1, stage), \
             title = coalesce(?2, title), \
             description = coalesce(?3, description), \
             spec_doc = coalesce(?4, spec_doc), \
             acceptance_criteria = coalesce(?5, acceptance_criteria), \
             branch_name = coalesce(?6, branch_name), \
             review_notes = coalesce(?7, review_notes), \
             review_passed = coalesce(?8, review_passed), \
             health_check = coalesce(?9, health_check), \
             priority = coalesce(?10, priority), \
             assigned_agent = coalesce(?11, assigned_agent), \
             assigned_to = coalesce(?12, assigned_to), \
             started_at = CASE WHEN ?13 AND started_at IS NULL \
                          THEN datetime('now') ELSE started_at END, \
             completed_at = CASE WHEN ?14 THEN datetime('now') ELSE completed_at END, \
             updated_at = datetime('now') \
             WHERE id = ?15",
        )
        .bind(stage_change)
        .bind(&updates.title)
        .bind(&updates.description)
        .bind(&updates.spec_doc)
        .bind(&criteria)
        .bind(&updates.branch_name)
        .bind(&updates.review_notes)
        .bind(updates.review_passed)
        .bind(&health_check)
        .bind(updates.priority)
        .bind(&updates.assigned_agent)
        .bind(&updates.assigned_to)
        .bind(leaving_initial)
        .bind(entering_terminal)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(new_stage) = stage_change {
            activity::append_tx(
                &mut tx,
                &ActivityRecord {
                    action: "pipeline_stage_changed".to_owned(),
                    category: Some("pipeline".to_owned()),
                    description: Some(format!(
                        "{} moved {} -> {new_stage}",
                        current.title, current.stage
                    )),
                    metadata: Some(serde_json::json!({
                        "from": current.stage,
                        "to": new_stage,
                        "title": current.title,
                    })),
                    source: Some(source.to_owned()),
                    related_id: Some(RelatedId::new("pipeline", id).to_string()),
                    ..ActivityRecord::default()
                },
            )
            .await?;
        }

        tx.commit().await?;

        let updated = self.get(id).await?;

        if self.auto_rollup && stage_change.is_some() {
            Box::pin(self.maybe_rollup(&updated)).await?;
        }

        Ok(updated)
    }

    /// Approve an item's spec: legacy `ready` stage plus approval fields.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn approve(&self, id: i64, approved_by: &str) -> CoreResult<()> {
        let current = self.get(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE pipeline SET stage = 'ready', approved_by = ?1, \
             approved_at = datetime('now'), updated_at = datetime('now') WHERE id = ?2",
        )
        .bind(approved_by)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if current.stage != "ready" {
            activity::append_tx(
                &mut tx,
                &ActivityRecord {
                    action: "pipeline_stage_changed".to_owned(),
                    category: Some("pipeline".to_owned()),
                    description: Some(format!("{} approved by {approved_by}", current.title)),
                    metadata: Some(serde_json::json!({
                        "from": current.stage,
                        "to": "ready",
                        "title": current.title,
                    })),
                    source: Some("main".to_owned()),
                    related_id: Some(RelatedId::new("pipeline", id).to_string()),
                    ..ActivityRecord::default()
                },
            )
            .await?;
        }

        tx.commit().await?;
        info!(id, approved_by, "pipeline item approved");
        Ok(())
    }

    /// List items. Without a stage filter, `done` and `live` are excluded.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list(&self, filter: &PipelineFilter) -> CoreResult<Vec<PipelineItem>> {
        let limit = if filter.limit == 0 { 100 } else { filter.limit };

        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM pipeline \
             WHERE (?1 IS NULL OR project_id = ?1) \
               AND (?2 IS NULL OR parent_id = ?2) \
               AND (?3 IS NULL OR stage = ?3) \
               AND (?3 IS NOT NULL OR stage NOT IN ('done', 'live')) \
               AND (?4 IS NULL OR type = ?4) \
             ORDER BY priority ASC, id ASC LIMIT ?5"
        ))
        .bind(filter.project_id)
        .bind(filter.parent_id)
        .bind(&filter.stage)
        .bind(filter.item_type.map(|t| t.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// All children of a feature, ordered by priority then creation.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn children(&self, feature_id: i64) -> CoreResult<Vec<PipelineItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM pipeline WHERE parent_id = ?1 \
             ORDER BY priority ASC, id ASC"
        ))
        .bind(feature_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Story rollup stats for a feature.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn story_stats(&self, feature_id: i64) -> CoreResult<StoryStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT stage, count(*) FROM pipeline \
             WHERE parent_id = ?1 AND type = 'story' GROUP BY stage",
        )
        .bind(feature_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_stage = BTreeMap::new();
        let mut total = 0i64;
        let mut done = 0i64;
        for (stage, count) in rows {
            total = total.saturating_add(count);
            if stage == "done" {
                done = count;
            }
            by_stage.insert(stage, count);
        }
        Ok(StoryStats {
            total,
            done,
            by_stage,
        })
    }

    // ── Sub-tasks ───────────────────────────────────────────────

    /// Add a sub-task to an item.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the item does not exist.
    pub async fn add_task(
        &self,
        pipeline_id: i64,
        title: &str,
        description: Option<&str>,
        assigned_to: Option<&str>,
    ) -> CoreResult<i64> {
        self.get(pipeline_id).await?;
        let result = sqlx::query(
            "INSERT INTO pipeline_tasks (pipeline_id, title, description, assigned_to) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(pipeline_id)
        .bind(title)
        .bind(description)
        .bind(assigned_to)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// All sub-tasks for an item, in creation order.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn tasks(&self, pipeline_id: i64) -> CoreResult<Vec<PipelineTask>> {
        let rows: Vec<(i64, i64, String, Option<String>, String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, pipeline_id, title, description, status, assigned_to, output, \
                 completed_at FROM pipeline_tasks WHERE pipeline_id = ?1 ORDER BY id ASC",
            )
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(
                |(id, pipeline_id, title, description, status, assigned_to, output, completed_at)| {
                    Ok(PipelineTask {
                        id,
                        pipeline_id,
                        title,
                        description,
                        status: TaskStatus::parse(&status)?,
                        assigned_to,
                        output,
                        completed_at,
                    })
                },
            )
            .collect()
    }

    /// Update a sub-task's status, output, or assignee.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the task does not exist.
    pub async fn update_task(
        &self,
        task_id: i64,
        status: Option<TaskStatus>,
        output: Option<&str>,
        assigned_to: Option<&str>,
    ) -> CoreResult<()> {
        let becoming_done = matches!(status, Some(TaskStatus::Done));
        let result = sqlx::query(
            "UPDATE pipeline_tasks SET \
             status = coalesce(?1, status), \
             output = coalesce(?2, output), \
             assigned_to = coalesce(?3, assigned_to), \
             completed_at = CASE WHEN ?4 AND completed_at IS NULL \
                            THEN datetime('now') ELSE completed_at END \
             WHERE id = ?5",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(output)
        .bind(assigned_to)
        .bind(becoming_done)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("pipeline task {task_id}")));
        }
        Ok(())
    }

    // ── Notes ───────────────────────────────────────────────────

    /// Append a note to an item's audit trail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the item does not exist.
    pub async fn add_note(
        &self,
        pipeline_id: i64,
        agent_role: &str,
        note_type: NoteType,
        content: &str,
    ) -> CoreResult<i64> {
        self.get(pipeline_id).await?;
        let result = sqlx::query(
            "INSERT INTO pipeline_notes (pipeline_id, agent_role, note_type, content) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(pipeline_id)
        .bind(agent_role)
        .bind(note_type.as_str())
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// An item's notes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn notes(&self, pipeline_id: i64) -> CoreResult<Vec<PipelineNote>> {
        let rows: Vec<(i64, i64, String, String, String, String)> = sqlx::query_as(
            "SELECT id, pipeline_id, agent_role, note_type, content, created_at \
             FROM pipeline_notes WHERE pipeline_id = ?1 ORDER BY id ASC",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, pipeline_id, agent_role, note_type, content, created_at)| {
                Ok(PipelineNote {
                    id,
                    pipeline_id,
                    agent_role,
                    note_type: NoteType::parse(&note_type)?,
                    content,
                    created_at,
                })
            })
            .collect()
    }

    // ── Advisory rollup ─────────────────────────────────────────

    /// Advisory story→feature transitions: first story in progress moves
    /// the feature to `building`; all stories done moves it to `live`.
    async fn maybe_rollup(&self, story: &PipelineItem) -> CoreResult<()> {
        if story.item_type != ItemType::Story {
            return Ok(());
        }
        let Some(parent_id) = story.parent_id else {
            return Ok(());
        };
        let parent = self.get(parent_id).await?;
        if parent.item_type != ItemType::Feature {
            return Ok(());
        }

        match story.stage.as_str() {
            "in-progress" => {
                let feature_stages = stages::valid_stages(ItemType::Feature);
                let building_idx = feature_stages.iter().position(|s| *s == "building");
                let parent_idx = feature_stages.iter().position(|s| *s == parent.stage);
                let before_building = match (parent_idx, building_idx) {
                    (Some(p), Some(b)) => p < b,
                    // Legacy parent stage ('ready'): treat as pre-building.
                    (None, _) => true,
                    _ => false,
                };
                if before_building {
                    self.update(
                        parent_id,
                        &PipelineUpdate {
                            stage: Some("building".to_owned()),
                            ..PipelineUpdate::default()
                        },
                        "auto",
                    )
                    .await?;
                }
            }
            "done" => {
                let stats = self.story_stats(parent_id).await?;
                if stats.total > 0 && stats.done == stats.total && parent.stage != "live" {
                    self.update(
                        parent_id,
                        &PipelineUpdate {
                            stage: Some("live".to_owned()),
                            ..PipelineUpdate::default()
                        },
                        "auto",
                    )
                    .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn item_from_row(row: &SqliteRow) -> CoreResult<PipelineItem> {
    let criteria: String = row.try_get("acceptance_criteria")?;
    let health_check: Option<String> = row.try_get("health_check")?;
    let item_type: String = row.try_get("type")?;
    Ok(PipelineItem {
        id: row.try_get("id")?,
        item_type: ItemType::parse(&item_type)?,
        parent_id: row.try_get("parent_id")?,
        project_id: row.try_get("project_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        stage: row.try_get("stage")?,
        spec_doc: row.try_get("spec_doc")?,
        acceptance_criteria: serde_json::from_str(&criteria)
            .map_err(|e| CoreError::Parse(format!("acceptance criteria: {e}")))?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        branch_name: row.try_get("branch_name")?,
        review_notes: row.try_get("review_notes")?,
        review_passed: row.try_get("review_passed")?,
        health_check: health_check.and_then(|h| serde_json::from_str(&h).ok()),
        priority: row.try_get("priority")?,
        assigned_agent: row.try_get("assigned_agent")?,
        assigned_to: row.try_get("assigned_to")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
