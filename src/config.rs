//! Configuration loading and runtime path resolution.
//!
//! Settings come from `~/.openclaw/config.toml` when present; environment
//! variables override file values; file values override defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Filesystem layout for persistent state.
///
/// Everything lives under `~/.openclaw`: the SQLite database in `data/`,
/// secret files in `secrets/`, rotated logs in `logs/`.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Base directory (`~/.openclaw`).
    pub base_dir: PathBuf,
    /// SQLite database file.
    pub db_file: PathBuf,
    /// Directory holding `credentials.json` and per-service token files.
    pub secrets_dir: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
    /// Directory of session transcript files.
    pub transcripts_dir: PathBuf,
}

/// Resolve runtime paths, honouring `OPENCLAW_DB` and `OPENCLAW_TRANSCRIPTS`.
///
/// # Errors
///
/// Returns an error when the home directory cannot be determined.
pub fn runtime_paths() -> Result<RuntimePaths> {
    runtime_paths_with(|key| std::env::var(key).ok())
}

/// Resolve runtime paths using a custom env resolver (for testing).
///
/// # Errors
///
/// Returns an error when the home directory cannot be determined.
pub fn runtime_paths_with(env: impl Fn(&str) -> Option<String>) -> Result<RuntimePaths> {
    let base_dirs = directories::BaseDirs::new().context("cannot determine home directory")?;
    let base_dir = base_dirs.home_dir().join(".openclaw");

    let db_file = match env("OPENCLAW_DB") {
        Some(p) => PathBuf::from(p),
        None => base_dir.join("data").join("agent.db"),
    };
    let transcripts_dir = match env("OPENCLAW_TRANSCRIPTS") {
        Some(p) => PathBuf::from(p),
        None => base_dir.join("sessions"),
    };

    Ok(RuntimePaths {
        secrets_dir: base_dir.join("secrets"),
        logs_dir: base_dir.join("logs"),
        db_file,
        transcripts_dir,
        base_dir,
    })
}

// ── File config ─────────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenclawConfig {
    /// Model routing overrides.
    pub routing: RoutingConfig,
    /// Session-recall indexing settings.
    pub recall: RecallConfig,
    /// Dev-pipeline settings.
    pub pipeline: PipelineConfig,
}

/// Model routing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider used when no task-type route matches.
    pub default_provider: String,
    /// Embedding model identifier.
    pub embedding_model: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_provider: "gemini".to_owned(),
            embedding_model: crate::embedding::DEFAULT_EMBEDDING_MODEL.to_owned(),
        }
    }
}

/// Session-recall indexing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Maximum estimated tokens per chunk before splitting.
    pub max_chunk_tokens: usize,
    /// Maximum chunks indexed per session file.
    pub max_chunks_per_session: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 500,
            max_chunks_per_session: 2000,
        }
    }
}

/// Dev-pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Enable advisory story→feature stage rollup.
    pub auto_rollup: bool,
}

impl OpenclawConfig {
    /// Load configuration from `~/.openclaw/config.toml`, falling back to
    /// defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(paths: &RuntimePaths) -> Result<Self> {
        let path = paths.base_dir.join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }
}
