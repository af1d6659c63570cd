//! Exchange-based transcript chunking.
//!
//! One chunk is one user→assistant exchange. Oversized exchanges split on
//! paragraph boundaries, then sentences, then raw character position, with
//! a sentence-tail overlap carried into each following piece so context
//! survives the cut.

use tracing::warn;

use super::metadata;
use super::transcript::TranscriptRecord;

/// Character overlap carried between sub-chunks of a split exchange.
const OVERLAP_CHARS: usize = 200;

/// Chunking limits.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum estimated tokens per chunk; exchanges at the boundary are
    /// not split.
    pub max_chunk_tokens: usize,
    /// Maximum chunks kept per session; excess is truncated with a warning.
    pub max_chunks_per_session: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 500,
            max_chunks_per_session: 2000,
        }
    }
}

/// A chunk ready for contextualisation and embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Display text (`"User: ...\n\nAssistant: ..."`).
    pub content: String,
    /// Timestamp of the exchange's user message.
    pub timestamp: Option<String>,
    /// Roles present in the exchange.
    pub speakers: Vec<String>,
    /// Extracted topic tags.
    pub topic_tags: Vec<String>,
    /// Decision markers present.
    pub has_decision: bool,
    /// Action markers present.
    pub has_action: bool,
    /// Estimated token count.
    pub token_count: usize,
}

/// Result of chunking one session.
#[derive(Debug)]
pub struct ChunkOutcome {
    /// Chunks in transcript order.
    pub chunks: Vec<RawChunk>,
    /// Whether the per-session cap truncated the output.
    pub truncated: bool,
}

/// Cheap token estimate: `ceil(chars / 4)`.
///
/// Deliberately approximate; the same estimator feeds both the split
/// threshold and prompt budgets so they stay consistent.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

struct ExtractedMessage {
    role: String,
    text: String,
    timestamp: String,
}

/// Chunk a session's records into exchanges.
pub fn chunk_records(records: &[TranscriptRecord], config: &ChunkerConfig) -> ChunkOutcome {
    let messages: Vec<ExtractedMessage> = records
        .iter()
        .filter_map(|record| {
            let message = record.message.as_ref()?;
            let text = message.content.text();
            // Empty text content: skip the message entirely.
            if text.trim().is_empty() {
                return None;
            }
            Some(ExtractedMessage {
                role: message.role.clone(),
                text,
                timestamp: record.timestamp.clone(),
            })
        })
        .collect();

    let mut chunks: Vec<RawChunk> = Vec::new();
    let mut i = 0usize;
    while i < messages.len() {
        if messages[i].role != "user" {
            i = i.saturating_add(1);
            continue;
        }
        let user = &messages[i];

        // Consume following non-assistant messages until an assistant reply
        // (or the next user message) appears.
        let mut j = i.saturating_add(1);
        let mut assistant: Option<&ExtractedMessage> = None;
        while j < messages.len() {
            match messages[j].role.as_str() {
                "assistant" => {
                    assistant = Some(&messages[j]);
                    break;
                }
                "user" => break,
                _ => j = j.saturating_add(1),
            }
        }

        let (content, speakers) = match assistant {
            Some(reply) => (
                format!("User: {}\n\nAssistant: {}", user.text, reply.text),
                vec!["user".to_owned(), "assistant".to_owned()],
            ),
            None => (format!("User: {}", user.text), vec!["user".to_owned()]),
        };

        for piece in split_to_size(&content, config.max_chunk_tokens) {
            chunks.push(build_chunk(piece, &user.timestamp, &speakers));
        }

        i = if assistant.is_some() {
            j.saturating_add(1)
        } else {
            j.max(i.saturating_add(1))
        };
    }

    let truncated = chunks.len() > config.max_chunks_per_session;
    if truncated {
        warn!(
            produced = chunks.len(),
            cap = config.max_chunks_per_session,
            "session exceeds chunk cap, truncating"
        );
        chunks.truncate(config.max_chunks_per_session);
    }

    ChunkOutcome { chunks, truncated }
}

fn build_chunk(content: String, timestamp: &str, speakers: &[String]) -> RawChunk {
    RawChunk {
        topic_tags: metadata::topic_tags(&content),
        has_decision: metadata::has_decision(&content),
        has_action: metadata::has_action(&content),
        token_count: estimate_tokens(&content),
        timestamp: Some(timestamp.to_owned()),
        speakers: speakers.to_vec(),
        content,
    }
}

/// Split `text` into pieces of at most `max_tokens` estimated tokens.
///
/// Text at or under the limit is returned whole. Splitting prefers
/// paragraph boundaries, falls back to sentences, and finally to raw
/// character position. A tail of up to 200 characters (the last two
/// sentences of the previous piece) is carried into each following piece.
fn split_to_size(text: &str, max_tokens: usize) -> Vec<String> {
    if estimate_tokens(text) <= max_tokens {
        return vec![text.to_owned()];
    }

    let max_chars = max_tokens.saturating_mul(4).max(1);

    let paragraphs: Vec<String> = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(str::to_owned)
        .collect();

    let (units, separator) = if paragraphs.len() >= 2 {
        (paragraphs, "\n\n")
    } else {
        let sentences = split_sentences(text);
        if sentences.len() >= 2 {
            (sentences, " ")
        } else {
            // No boundaries at all: force-split on character position.
            return force_split(text, max_chars);
        }
    };

    pack_units(&units, separator, max_chars)
}

/// Greedily pack units into pieces of at most `max_chars`, carrying the
/// overlap tail forward.
fn pack_units(units: &[String], separator: &str, max_chars: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    let push_unit = |pieces: &mut Vec<String>, current: &mut String, unit: &str| {
        let projected = current
            .chars()
            .count()
            .saturating_add(separator.chars().count())
            .saturating_add(unit.chars().count());
        if !current.is_empty() && projected > max_chars {
            let overlap = overlap_tail(current);
            pieces.push(std::mem::take(current));
            if !overlap.is_empty() {
                current.push_str(&overlap);
            }
        }
        if !current.is_empty() {
            current.push_str(separator);
        }
        current.push_str(unit);
    };

    for unit in units {
        if unit.chars().count() > max_chars {
            for fragment in force_split(unit, max_chars) {
                push_unit(&mut pieces, &mut current, &fragment);
            }
        } else {
            push_unit(&mut pieces, &mut current, unit);
        }
    }

    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// The last two sentences of `text`, capped at the trailing 200 characters.
fn overlap_tail(text: &str) -> String {
    let sentences = split_sentences(text);
    let tail: String = match sentences.len() {
        0 => return String::new(),
        1 => sentences[0].clone(),
        n => format!("{} {}", sentences[n - 2], sentences[n - 1]),
    };

    let chars: Vec<char> = tail.chars().collect();
    if chars.len() > OVERLAP_CHARS {
        chars[chars.len().saturating_sub(OVERLAP_CHARS)..]
            .iter()
            .collect()
    } else {
        tail
    }
}

/// Split on sentence punctuation, keeping the delimiter with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_owned());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_owned());
    }
    sentences
}

/// Hard split on character position.
fn force_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}
