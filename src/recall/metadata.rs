//! Chunk metadata extraction: topic tags and decision/action signals.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Number of topic tags kept per chunk.
const TOP_TAGS: usize = 3;

/// Minimum word length considered for topic tags.
const MIN_TAG_LEN: usize = 4;

/// Common words excluded from topic tags.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "between", "both", "could",
    "does", "doing", "down", "each", "even", "every", "from", "have", "having", "here", "into",
    "just", "like", "made", "make", "many", "more", "most", "much", "only", "other", "over",
    "really", "same", "should", "some", "something", "still", "such", "sure", "than", "that",
    "their", "them", "then", "there", "these", "they", "thing", "things", "this", "those",
    "through", "under", "very", "want", "well", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your",
];

fn decision_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bdecided\b",
            r"(?i)\bconclude",
            r"(?i)\bresolved\b",
            r"(?i)final decision",
            r"(?i)settled on",
            r"(?i)opted for",
            r"(?i)we'll use",
            r"(?i)going with",
            r"(?i)\bagreed\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn action_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\btodo\b",
            r"(?i)action item",
            r"(?i)\btask\b",
            r"(?i)need to",
            r"(?i)\bimplement",
            r"(?i)\bbuild\b",
            r"(?i)follow up",
            r"(?i)next step",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// True when any decision marker matches.
pub fn has_decision(text: &str) -> bool {
    decision_patterns().iter().any(|p| p.is_match(text))
}

/// True when any action marker matches.
pub fn has_action(text: &str) -> bool {
    action_patterns().iter().any(|p| p.is_match(text))
}

/// Top-3 most frequent significant words.
///
/// Words are lowercased, hyphens rewritten to underscores, other non-word
/// characters stripped. Tokens must be longer than three characters, not a
/// stopword, and not purely numeric. Ties break alphabetically so the
/// result is deterministic.
pub fn topic_tags(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for raw in text.to_lowercase().split_whitespace() {
        let word: String = raw
            .chars()
            .map(|c| if c == '-' { '_' } else { c })
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.len() < MIN_TAG_LEN {
            continue;
        }
        if STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_TAGS);
    ranked.into_iter().map(|(word, _)| word).collect()
}
