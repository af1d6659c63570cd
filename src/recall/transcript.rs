//! Session transcript parsing and validation.
//!
//! A transcript is a newline-delimited stream of JSON records. Only records
//! carrying a `message` with extractable text matter for indexing; malformed
//! lines are skipped with a warning and counted toward a quarantine
//! threshold.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::errors::{CoreError, CoreResult};

/// Parse errors tolerated per file before the session is quarantined.
pub const QUARANTINE_THRESHOLD: usize = 10;

/// One line of a session transcript.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptRecord {
    /// Record type tag (`"message"`, `"event"`, ...).
    #[serde(rename = "type")]
    pub record_type: String,
    /// Conversation message, when the record carries one.
    #[serde(default)]
    pub message: Option<TranscriptMessage>,
    /// Record timestamp.
    pub timestamp: String,
    /// Optional record id.
    #[serde(default)]
    pub id: Option<String>,
}

/// A conversation message inside a record.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    /// Speaker role (`"user"`, `"assistant"`, `"tool"`, ...).
    pub role: String,
    /// Message content: a plain string or typed parts.
    pub content: MessageContent,
}

/// Message content — plain text or a sequence of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks; only `text` parts are of interest.
    Parts(Vec<ContentPart>),
}

/// A single structured content part. Non-text parts are preserved but
/// contribute no text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// A text block (`{"type": "text", "text": "..."}`).
    Text {
        /// Part type tag; anything but `"text"` falls to [`Self::Other`].
        #[serde(rename = "type")]
        part_type: String,
        /// The text content.
        text: String,
    },
    /// Any other part shape (tool calls, attachments).
    Other(Value),
}

impl MessageContent {
    /// Extract plain text, joining all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { part_type, text } if part_type == "text" => {
                        Some(text.as_str())
                    }
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Outcome of loading one transcript file.
#[derive(Debug)]
pub struct LoadedTranscript {
    /// Successfully parsed records, in file order.
    pub records: Vec<TranscriptRecord>,
    /// Number of lines that failed to parse.
    pub parse_errors: usize,
    /// Total non-empty lines seen.
    pub total_lines: usize,
}

impl LoadedTranscript {
    /// Whether the file crossed the quarantine threshold.
    pub fn should_quarantine(&self) -> bool {
        self.parse_errors > QUARANTINE_THRESHOLD
    }
}

/// Parse one transcript line.
///
/// # Errors
///
/// Returns [`CoreError::Parse`] for malformed JSON or missing required
/// fields.
pub fn parse_line(line: &str) -> CoreResult<TranscriptRecord> {
    let record: TranscriptRecord =
        serde_json::from_str(line).map_err(|e| CoreError::Parse(format!("transcript line: {e}")))?;
    if record.record_type.is_empty() {
        return Err(CoreError::Parse("transcript record has empty type".to_owned()));
    }
    Ok(record)
}

/// Parse transcript contents line by line.
///
/// Invalid lines are skipped with a warning; the caller decides whether the
/// error count quarantines the session.
pub fn parse_transcript(contents: &str) -> LoadedTranscript {
    let mut records = Vec::new();
    let mut parse_errors = 0usize;
    let mut total_lines = 0usize;

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        total_lines = total_lines.saturating_add(1);
        match parse_line(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                parse_errors = parse_errors.saturating_add(1);
                warn!(
                    line = line_no.saturating_add(1),
                    error = %err,
                    "skipping malformed transcript line"
                );
            }
        }
    }

    LoadedTranscript {
        records,
        parse_errors,
        total_lines,
    }
}

/// Read and validate a transcript file.
///
/// # Errors
///
/// Returns [`CoreError::Parse`] when the file cannot be read or is not
/// valid UTF-8.
pub async fn load_file(path: &Path) -> CoreResult<LoadedTranscript> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| CoreError::Parse(format!("cannot read {}: {e}", path.display())))?;
    let contents = String::from_utf8(raw)
        .map_err(|e| CoreError::Parse(format!("{} is not UTF-8: {e}", path.display())))?;
    Ok(parse_transcript(&contents))
}

/// Session id for a transcript path: the basename before the extension.
pub fn session_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
