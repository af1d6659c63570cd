//! Self-observation: passive behavioural signals and weekly synthesis.
//!
//! Signal capture writes plain activity rows under `self_obs_*` categories.
//! A weekly synthesis step (driven by an external cron) runs the LLM over
//! the week's signals and stores 3–5 observations with evidence pointers.
//! Operator feedback lands on the row; `useful` observations can be
//! promoted into long-term memory.

use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::activity::{ActivityLog, ActivityRecord};
use crate::errors::{CoreError, CoreResult};
use crate::memory::{MemoryCategory, MemoryEntry, MemoryStore};
use crate::router::{ModelRouter, RouteRequest, TaskType};

/// Observations kept per synthesis run.
const MAX_OBSERVATIONS_PER_WEEK: usize = 5;

/// Behavioural observation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationCategory {
    /// What kinds of tasks get picked up, finished, delegated.
    TaskPreference,
    /// Response tone, length, and silences.
    Communication,
    /// Autonomy vs. permission-seeking, with risk level.
    Decision,
    /// Tool failures and corrections.
    Error,
    /// Anything else.
    Other,
}

impl ObservationCategory {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskPreference => "task_preference",
            Self::Communication => "communication",
            Self::Decision => "decision",
            Self::Error => "error",
            Self::Other => "other",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "task_preference" => Ok(Self::TaskPreference),
            "communication" => Ok(Self::Communication),
            "decision" => Ok(Self::Decision),
            "error" => Ok(Self::Error),
            "other" => Ok(Self::Other),
            other => Err(CoreError::Validation(format!(
                "invalid observation category: {other:?}"
            ))),
        }
    }

    /// Activity category used for raw signal rows.
    pub fn activity_category(&self) -> String {
        format!("self_obs_{}", self.as_str())
    }
}

/// A synthesised observation row.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Row id.
    pub id: i64,
    /// ISO date of the week's Monday.
    pub week_start: String,
    /// Category.
    pub category: ObservationCategory,
    /// The observation text.
    pub observation: String,
    /// Evidence pointers (signal descriptions, activity ids).
    pub evidence: Vec<String>,
    /// Model confidence 0..1.
    pub confidence: f64,
    /// Operator feedback, when given.
    pub feedback: Option<String>,
    /// Optional feedback note.
    pub feedback_note: Option<String>,
}

/// Captures signals and runs weekly synthesis.
pub struct SelfObserver {
    pool: SqlitePool,
    activity: ActivityLog,
}

impl std::fmt::Debug for SelfObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfObserver").finish_non_exhaustive()
    }
}

impl SelfObserver {
    /// Create an observer.
    pub fn new(pool: SqlitePool, activity: ActivityLog) -> Self {
        Self { pool, activity }
    }

    /// Record one behavioural signal as an activity row.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn record_signal(
        &self,
        category: ObservationCategory,
        action: &str,
        description: &str,
        metadata: Option<Value>,
    ) -> CoreResult<i64> {
        self.activity
            .log_full(ActivityRecord {
                action: action.to_owned(),
                category: Some(category.activity_category()),
                description: Some(description.to_owned()),
                metadata,
                source: Some("main".to_owned()),
                ..ActivityRecord::default()
            })
            .await
    }

    /// Signal: a task was started.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn task_started(&self, description: &str) -> CoreResult<i64> {
        self.record_signal(
            ObservationCategory::TaskPreference,
            "task_started",
            description,
            None,
        )
        .await
    }

    /// Signal: a task was completed.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn task_completed(&self, description: &str) -> CoreResult<i64> {
        self.record_signal(
            ObservationCategory::TaskPreference,
            "task_completed",
            description,
            None,
        )
        .await
    }

    /// Signal: a task was delegated to a sub-agent.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn task_delegated(&self, description: &str) -> CoreResult<i64> {
        self.record_signal(
            ObservationCategory::TaskPreference,
            "task_delegated",
            description,
            None,
        )
        .await
    }

    /// Signal: a response was sent, with tone and length.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn comm_response(&self, tone: &str, length: usize) -> CoreResult<i64> {
        self.record_signal(
            ObservationCategory::Communication,
            "comm_response",
            tone,
            Some(serde_json::json!({ "tone": tone, "length": length })),
        )
        .await
    }

    /// Signal: a decision was taken autonomously (or permission was asked).
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn decision(&self, autonomous: bool, risk: &str, description: &str) -> CoreResult<i64> {
        let action = if autonomous {
            "decision_autonomous"
        } else {
            "decision_asked_permission"
        };
        self.record_signal(
            ObservationCategory::Decision,
            action,
            description,
            Some(serde_json::json!({ "risk": risk })),
        )
        .await
    }

    /// Signal: a tool failed, or a correction happened.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub async fn error_signal(&self, action: &str, description: &str) -> CoreResult<i64> {
        self.record_signal(ObservationCategory::Error, action, description, None)
            .await
    }

    /// Synthesise the week's signals into 3–5 stored observations.
    ///
    /// `week_start` is an ISO date; signals in `[week_start, week_start+7d)`
    /// participate. Returns inserted row ids (empty when there was nothing
    /// to synthesise).
    ///
    /// # Errors
    ///
    /// Returns provider errors from the LLM call and storage errors.
    pub async fn synthesize_week(
        &self,
        router: &ModelRouter,
        week_start: &str,
    ) -> CoreResult<Vec<i64>> {
        let signals: Vec<(i64, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, action, category, description FROM activity \
             WHERE category LIKE 'self_obs_%' \
               AND created_at >= ?1 AND created_at < datetime(?1, '+7 days') \
             ORDER BY id ASC",
        )
        .bind(week_start)
        .fetch_all(&self.pool)
        .await?;

        if signals.is_empty() {
            debug!(week_start, "no signals to synthesise");
            return Ok(Vec::new());
        }

        let mut listing = String::new();
        for (id, action, category, description) in &signals {
            let category = category.as_deref().unwrap_or("self_obs_other");
            let description = description.as_deref().unwrap_or("");
            listing.push_str(&format!("[{id}] {category}/{action}: {description}\n"));
        }

        let prompt = format!(
            "Below are one week of behavioural signals from a personal assistant \
             runtime. Produce between 3 and 5 observations about behavioural \
             patterns. Output ONLY a JSON array; each element must be \
             {{\"category\": one of \"task_preference\", \"communication\", \
             \"decision\", \"error\", \"other\", \"observation\": string, \
             \"evidence\": array of signal ids as strings, \
             \"confidence\": number between 0 and 1}}.\n\nWeek of {week_start}."
        );

        let outcome = router
            .route(&RouteRequest {
                task_type: Some(TaskType::Extract),
                prompt,
                content: Some(listing),
                source: Some("observer".to_owned()),
                ..RouteRequest::default()
            })
            .await?;

        let parsed = parse_observations(&outcome.text);
        if parsed.is_empty() {
            warn!(week_start, "synthesis produced no parseable observations");
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for obs in parsed.into_iter().take(MAX_OBSERVATIONS_PER_WEEK) {
            let evidence = serde_json::to_string(&obs.evidence)?;
            let result = sqlx::query(
                "INSERT INTO self_observations (week_start, category, observation, \
                 evidence, confidence) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(week_start)
            .bind(obs.category.as_str())
            .bind(&obs.observation)
            .bind(evidence)
            .bind(obs.confidence.clamp(0.0, 1.0))
            .execute(&self.pool)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        debug!(week_start, count = ids.len(), "weekly observations stored");
        Ok(ids)
    }

    /// Store operator feedback on an observation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn record_feedback(
        &self,
        id: i64,
        useful: bool,
        note: Option<&str>,
    ) -> CoreResult<()> {
        let feedback = if useful { "useful" } else { "not_useful" };
        let result = sqlx::query(
            "UPDATE self_observations SET feedback = ?1, feedback_note = ?2 WHERE id = ?3",
        )
        .bind(feedback)
        .bind(note)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("observation {id}")));
        }
        Ok(())
    }

    /// Promote a `useful` observation into long-term memory as a lesson.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when the observation was not rated
    /// useful, [`CoreError::NotFound`] for unknown ids.
    pub async fn promote(&self, memory: &MemoryStore, id: i64) -> CoreResult<i64> {
        let observation = self.get(id).await?;
        if observation.feedback.as_deref() != Some("useful") {
            return Err(CoreError::Validation(format!(
                "observation {id} is not rated useful"
            )));
        }

        let mut entry = MemoryEntry::new(MemoryCategory::Lesson, &observation.observation);
        entry.source = Some("observer".to_owned());
        entry.importance = 7;
        memory.add_memory(&entry, true).await
    }

    /// Fetch one observation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] when the id does not exist.
    pub async fn get(&self, id: i64) -> CoreResult<Observation> {
        let row: Option<(i64, String, String, String, String, f64, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, week_start, category, observation, evidence, confidence, \
                 feedback, feedback_note FROM self_observations WHERE id = ?1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(observation_from_tuple)
            .transpose()?
            .ok_or_else(|| CoreError::NotFound(format!("observation {id}")))
    }

    /// Observations for a week.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list_week(&self, week_start: &str) -> CoreResult<Vec<Observation>> {
        let rows: Vec<(i64, String, String, String, String, f64, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, week_start, category, observation, evidence, confidence, \
                 feedback, feedback_note FROM self_observations \
                 WHERE week_start = ?1 ORDER BY id ASC",
            )
            .bind(week_start)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(observation_from_tuple).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ParsedObservation {
    category: String,
    observation: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

struct PreparedObservation {
    category: ObservationCategory,
    observation: String,
    evidence: Vec<String>,
    confidence: f64,
}

/// Parse the LLM's JSON array, salvaging it from surrounding prose.
///
/// Returns an empty vec on any parse failure.
fn parse_observations(text: &str) -> Vec<PreparedObservation> {
    let trimmed = text.trim();
    let json_text = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    let parsed: Vec<ParsedObservation> = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "cannot parse synthesis output");
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter(|o| !o.observation.trim().is_empty())
        .map(|o| PreparedObservation {
            category: ObservationCategory::parse(&o.category)
                .unwrap_or(ObservationCategory::Other),
            observation: o.observation,
            evidence: o.evidence,
            confidence: o.confidence,
        })
        .collect()
}

fn observation_from_tuple(
    row: (i64, String, String, String, String, f64, Option<String>, Option<String>),
) -> CoreResult<Observation> {
    let (id, week_start, category, observation, evidence, confidence, feedback, feedback_note) =
        row;
    Ok(Observation {
        id,
        week_start,
        category: ObservationCategory::parse(&category)?,
        observation,
        evidence: serde_json::from_str(&evidence)
            .map_err(|e| CoreError::Parse(format!("observation evidence: {e}")))?,
        confidence,
        feedback,
        feedback_note,
    })
}
