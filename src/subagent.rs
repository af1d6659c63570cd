//! Sub-agent orchestration: persona and memory context assembly.
//!
//! Builds the prompt for a spawn request without running an LLM itself. A
//! request is persona + relevant memories + shared guidelines + the task,
//! capped at a hard token ceiling. Spec-role output is parsed back into
//! acceptance criteria and a task breakdown for the pipeline.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::CoreResult;
use crate::memory::{MemoryStore, SemanticSearchOptions};
use crate::pipeline::{PipelineEngine, PipelineUpdate};
use crate::recall::chunker::estimate_tokens;

/// Hard ceiling on assembled prompt size, in estimated tokens.
const PROMPT_TOKEN_CEILING: usize = 5000;

/// Memories pulled into the context section.
const MEMORY_CONTEXT_LIMIT: usize = 3;

/// Similarity floor for context memories.
const MEMORY_CONTEXT_THRESHOLD: f32 = 0.4;

/// Guidelines appended to every sub-agent prompt.
const SHARED_GUIDELINES: &str = "\
## Guidelines
- Work only on the task below; do not expand scope.
- State assumptions explicitly and keep output self-contained.
- When producing sections, use '### ' markdown headings exactly.";

/// Sub-agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Writes code.
    Developer,
    /// Reviews and tests.
    Qa,
    /// Gathers information.
    Researcher,
    /// Writes prose.
    Writer,
    /// Writes feature specs.
    Spec,
}

impl AgentRole {
    /// Returns the role name used in labels and notes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Qa => "qa",
            Self::Researcher => "researcher",
            Self::Writer => "writer",
            Self::Spec => "spec",
        }
    }

    /// Parse a role name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::CoreError::Validation`] for unknown roles.
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "developer" => Ok(Self::Developer),
            "qa" => Ok(Self::Qa),
            "researcher" => Ok(Self::Researcher),
            "writer" => Ok(Self::Writer),
            "spec" => Ok(Self::Spec),
            other => Err(crate::errors::CoreError::Validation(format!(
                "unknown agent role: {other:?}"
            ))),
        }
    }

    /// Fixed persona text for the role.
    pub fn persona(&self) -> &'static str {
        match self {
            Self::Developer => {
                "You are a senior software developer. You write small, focused, \
                 well-tested changes and explain trade-offs briefly."
            }
            Self::Qa => {
                "You are a meticulous QA engineer. You hunt for edge cases, verify \
                 acceptance criteria one by one, and report failures precisely."
            }
            Self::Researcher => {
                "You are a thorough researcher. You gather facts from primary \
                 sources, cite them, and separate evidence from speculation."
            }
            Self::Writer => {
                "You are a clear technical writer. You produce concise prose with \
                 concrete examples and no filler."
            }
            Self::Spec => {
                "You are a product-minded spec writer. You turn a rough idea into \
                 a crisp spec with acceptance criteria and a task breakdown."
            }
        }
    }

    /// Default model for the role: reasoning tier for spec and build work,
    /// cheap tier for review and the rest.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Spec | Self::Developer => "deepseek-reasoner",
            Self::Qa | Self::Researcher | Self::Writer => "gemini-2.0-flash",
        }
    }

    /// Default run timeout in seconds.
    pub fn default_timeout_seconds(&self) -> u64 {
        match self {
            Self::Developer => 600,
            Self::Spec => 300,
            Self::Qa => 180,
            Self::Researcher | Self::Writer => 300,
        }
    }
}

/// A spawn request handed to the external LLM runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Fully assembled prompt.
    pub task: String,
    /// Model to run.
    pub model: String,
    /// Display label (`"<role>-<short id>"`).
    pub label: String,
    /// Cooperative run timeout.
    pub run_timeout_seconds: u64,
    /// Whether the runtime should clean up the child on completion.
    pub cleanup: bool,
}

/// Builds spawn requests from role, task, and memory context.
pub struct SubAgentOrchestrator {
    memory: Arc<MemoryStore>,
}

impl std::fmt::Debug for SubAgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentOrchestrator").finish_non_exhaustive()
    }
}

impl SubAgentOrchestrator {
    /// Create an orchestrator drawing context from the memory store.
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }

    /// Assemble a spawn request for `role` working on `task`.
    ///
    /// Up to three memories with similarity ≥ 0.4 against the task string
    /// are included; memory lookup failures degrade to an empty context
    /// section. The assembled prompt never exceeds the 5000-token ceiling.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the memory store is unreachable in a
    /// non-degradable way (never for missing embedder).
    pub async fn build_spawn_request(
        &self,
        role: AgentRole,
        task: &str,
        model_override: Option<&str>,
    ) -> CoreResult<SpawnRequest> {
        let memories = match self
            .memory
            .semantic_search(
                task,
                &SemanticSearchOptions {
                    limit: MEMORY_CONTEXT_LIMIT,
                    threshold: MEMORY_CONTEXT_THRESHOLD,
                    session_id: None,
                    source: Some("subagent".to_owned()),
                },
            )
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "memory context unavailable, spawning without it");
                Vec::new()
            }
        };

        let mut prompt = String::new();
        prompt.push_str(role.persona());
        prompt.push_str("\n\n");

        if !memories.is_empty() {
            prompt.push_str("## CONTEXT FROM MEMORY\n");
            for hit in &memories {
                prompt.push_str("- ");
                prompt.push_str(&hit.memory.content);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str(SHARED_GUIDELINES);
        prompt.push_str("\n\n## TASK\n");
        prompt.push_str(task);

        let prompt = enforce_ceiling(prompt, PROMPT_TOKEN_CEILING);

        let model = model_override.unwrap_or_else(|| role.default_model());
        let short_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let label = format!("{}-{short_id}", role.as_str());

        debug!(
            role = role.as_str(),
            model,
            memories = memories.len(),
            tokens = estimate_tokens(&prompt),
            "spawn request assembled"
        );

        Ok(SpawnRequest {
            task: prompt,
            model: model.to_owned(),
            label,
            run_timeout_seconds: role.default_timeout_seconds(),
            cleanup: true,
        })
    }

    /// Parse a spec-role output and apply it to a pipeline item: criteria
    /// replace the item's list, each breakdown entry becomes a sub-task.
    ///
    /// # Errors
    ///
    /// Returns pipeline storage errors.
    pub async fn apply_spec_output(
        &self,
        pipeline: &PipelineEngine,
        item_id: i64,
        output: &str,
    ) -> CoreResult<()> {
        let parsed = parse_spec_output(output);

        if !parsed.acceptance_criteria.is_empty() {
            pipeline
                .update(
                    item_id,
                    &PipelineUpdate {
                        acceptance_criteria: Some(parsed.acceptance_criteria),
                        spec_doc: Some(output.to_owned()),
                        ..PipelineUpdate::default()
                    },
                    "subagent",
                )
                .await?;
        }

        for task in &parsed.tasks {
            pipeline.add_task(item_id, task, None, None).await?;
        }

        Ok(())
    }
}

/// Sections extracted from spec-role output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecOutput {
    /// Bullets under `### Acceptance Criteria`.
    pub acceptance_criteria: Vec<String>,
    /// Bullets under `### Tasks Breakdown`.
    pub tasks: Vec<String>,
}

/// Extract the acceptance-criteria and task-breakdown sections.
pub fn parse_spec_output(text: &str) -> SpecOutput {
    SpecOutput {
        acceptance_criteria: section_bullets(text, "### Acceptance Criteria"),
        tasks: section_bullets(text, "### Tasks Breakdown"),
    }
}

/// Bullet lines under a `###` heading, up to the next heading.
fn section_bullets(text: &str, heading: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(heading) {
            in_section = true;
            continue;
        }
        if in_section && trimmed.starts_with("###") {
            break;
        }
        if !in_section || trimmed.is_empty() {
            continue;
        }
        bullets.push(strip_bullet(trimmed));
    }

    bullets
}

fn strip_bullet(line: &str) -> String {
    let stripped = line
        .trim_start_matches(|c: char| c == '-' || c == '*')
        .trim_start();
    // Numbered lists: "1. do the thing".
    let stripped = match stripped.split_once(". ") {
        Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => stripped,
    };
    stripped.to_owned()
}

/// Truncate `prompt` to at most `ceiling` estimated tokens.
fn enforce_ceiling(prompt: String, ceiling: usize) -> String {
    if estimate_tokens(&prompt) <= ceiling {
        return prompt;
    }
    let max_chars = ceiling.saturating_mul(4);
    prompt.chars().take(max_chars).collect()
}
