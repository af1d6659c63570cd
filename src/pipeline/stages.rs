//! Work-item types and their stage machines.
//!
//! The per-type valid-stage sets below are the single source of truth for
//! stage validation. The database CHECK constraint is the union of all sets
//! plus legacy values (`ready`, `build`, `review`) still present in old
//! rows; those legacy values are never valid *targets* here.

use crate::errors::{CoreError, CoreResult};

/// Kind of pipeline work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// A shippable feature; may own child stories.
    Feature,
    /// A unit of feature work.
    Story,
    /// A tracked risk.
    Risk,
    /// A defect or incident.
    Issue,
    /// An assumption to validate.
    Assumption,
    /// An external dependency.
    Dependency,
}

impl ItemType {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Story => "story",
            Self::Risk => "risk",
            Self::Issue => "issue",
            Self::Assumption => "assumption",
            Self::Dependency => "dependency",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for unknown values.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "feature" => Ok(Self::Feature),
            "story" => Ok(Self::Story),
            "risk" => Ok(Self::Risk),
            "issue" => Ok(Self::Issue),
            "assumption" => Ok(Self::Assumption),
            "dependency" => Ok(Self::Dependency),
            other => Err(CoreError::Validation(format!(
                "invalid pipeline item type: {other:?}"
            ))),
        }
    }
}

/// Valid stages for an item type, in forward order.
pub fn valid_stages(item_type: ItemType) -> &'static [&'static str] {
    match item_type {
        ItemType::Feature => &[
            "idea",
            "spec",
            "spec-review",
            "building",
            "final-review",
            "live",
        ],
        ItemType::Story => &["backlog", "in-progress", "qa", "done", "blocked"],
        ItemType::Risk => &["identified", "mitigating", "resolved", "accepted"],
        ItemType::Issue => &["identified", "investigating", "resolved"],
        ItemType::Assumption => &["identified", "validated", "invalidated"],
        ItemType::Dependency => &["identified", "waiting", "resolved", "blocked"],
    }
}

/// The stage a fresh item starts in.
pub fn initial_stage(item_type: ItemType) -> &'static str {
    valid_stages(item_type)[0]
}

/// Stages that set `completed_at` when entered.
pub fn is_terminal_stage(stage: &str) -> bool {
    matches!(
        stage,
        "live" | "done" | "resolved" | "accepted" | "validated" | "invalidated"
    )
}

/// Check that `stage` is a valid member for the type.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] quoting the valid stage set.
pub fn validate_stage(item_type: ItemType, stage: &str) -> CoreResult<()> {
    let stages = valid_stages(item_type);
    if stages.contains(&stage) {
        return Ok(());
    }
    Err(CoreError::Validation(format!(
        "stage {stage:?} is not valid for {}; valid stages: {{{}}}",
        item_type.as_str(),
        stages.join(", ")
    )))
}

/// Check a stage transition.
///
/// Transitions are monotonic within stage-set order, except that `blocked`
/// is reachable from anywhere (when the type has it) and any forward stage
/// is reachable from `blocked`. A `from` stage outside the modern set
/// (legacy rows) only has its target validated.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] for an invalid target stage or a
/// backward transition.
pub fn validate_transition(item_type: ItemType, from: &str, to: &str) -> CoreResult<()> {
    validate_stage(item_type, to)?;

    if from == "blocked" || to == "blocked" {
        return Ok(());
    }

    let stages = valid_stages(item_type);
    let Some(from_idx) = stages.iter().position(|s| *s == from) else {
        // Legacy stage ('ready', 'build', 'review'): no ordering to enforce.
        return Ok(());
    };
    let Some(to_idx) = stages.iter().position(|s| *s == to) else {
        return Ok(());
    };

    if to_idx < from_idx {
        return Err(CoreError::Validation(format!(
            "cannot move {} backward from {from:?} to {to:?}",
            item_type.as_str()
        )));
    }
    Ok(())
}
