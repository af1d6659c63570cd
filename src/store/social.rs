//! Social post history and near-duplicate detection.

use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::errors::CoreResult;

/// Default Jaccard similarity threshold for duplicate detection.
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.6;

/// How many recent posts per platform are compared.
const DUPLICATE_WINDOW: i64 = 30;

/// Minimum token length considered significant.
const MIN_TOKEN_LEN: usize = 4;

/// A stored social post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialPost {
    /// Row id.
    pub id: i64,
    /// Platform name (e.g. `"x"`, `"linkedin"`).
    pub platform: String,
    /// Post body.
    pub content: String,
}

/// Result of a duplicate check.
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    /// Whether a prior post crossed the threshold.
    pub is_duplicate: bool,
    /// Highest similarity found.
    pub similarity: f64,
    /// The most similar prior post, when one crossed the threshold.
    pub matched_post: Option<SocialPost>,
}

/// Record a post.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn add_post(pool: &SqlitePool, platform: &str, content: &str) -> CoreResult<i64> {
    let result = sqlx::query(
        "INSERT INTO social_posts (platform, content, posted_at) \
         VALUES (?1, ?2, datetime('now'))",
    )
    .bind(platform)
    .bind(content)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Compare `content` against the platform's last 30 posts using Jaccard
/// similarity over significant words.
///
/// Words are lowercased, stripped of punctuation, and only tokens longer
/// than three characters participate. At `threshold = 1.0` only identical
/// word sets match.
///
/// # Errors
///
/// Returns a storage error when the history query fails.
pub async fn check_duplicate(
    pool: &SqlitePool,
    platform: &str,
    content: &str,
    threshold: f64,
) -> CoreResult<DuplicateCheck> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        "SELECT id, platform, content FROM social_posts \
         WHERE platform = ?1 ORDER BY id DESC LIMIT ?2",
    )
    .bind(platform)
    .bind(DUPLICATE_WINDOW)
    .fetch_all(pool)
    .await?;

    let candidate_words = significant_words(content);
    let mut best_similarity = 0.0f64;
    let mut best_post: Option<SocialPost> = None;

    for (id, platform, prior_content) in rows {
        let similarity = jaccard(&candidate_words, &significant_words(&prior_content));
        if similarity > best_similarity {
            best_similarity = similarity;
            best_post = Some(SocialPost {
                id,
                platform,
                content: prior_content,
            });
        }
    }

    let is_duplicate = best_similarity >= threshold;
    Ok(DuplicateCheck {
        is_duplicate,
        similarity: best_similarity,
        matched_post: if is_duplicate { best_post } else { None },
    })
}

/// Lowercased, punctuation-stripped words longer than three characters.
fn significant_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| word.len() >= MIN_TOKEN_LEN)
        .collect()
}

// Word-set sizes stay far below 2^52, so the f64 conversion is exact.
#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
