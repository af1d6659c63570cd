//! Contacts and content items.

use sqlx::SqlitePool;

use crate::errors::{CoreError, CoreResult};

/// A stored contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Relationship to the operator.
    pub relation: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Last contact timestamp.
    pub last_contacted: Option<String>,
}

/// Create a contact.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn add_contact(
    pool: &SqlitePool,
    name: &str,
    relation: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
) -> CoreResult<i64> {
    let result = sqlx::query(
        "INSERT INTO contacts (name, relation, email, phone) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(name)
    .bind(relation)
    .bind(email)
    .bind(phone)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Case-insensitive name lookup.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn find_contacts(pool: &SqlitePool, name: &str) -> CoreResult<Vec<Contact>> {
    let rows: Vec<(i64, String, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            "SELECT id, name, relation, email, phone, notes, last_contacted \
             FROM contacts WHERE name LIKE '%' || ?1 || '%' ORDER BY name",
        )
        .bind(name)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(
            |(id, name, relation, email, phone, notes, last_contacted)| Contact {
                id,
                name,
                relation,
                email,
                phone,
                notes,
                last_contacted,
            },
        )
        .collect())
}

/// Record that the operator touched base with a contact.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] when the id does not exist.
pub async fn touch_contact(pool: &SqlitePool, id: i64) -> CoreResult<()> {
    let result = sqlx::query(
        "UPDATE contacts SET last_contacted = datetime('now'), \
         updated_at = datetime('now') WHERE id = ?1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("contact {id}")));
    }
    Ok(())
}

// ── Content items ───────────────────────────────────────────────

/// A tracked piece of content (draft post, article, note).
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    /// Row id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Kind (`"note"`, `"article"`, `"thread"`, ...).
    pub kind: String,
    /// Workflow status (`"draft"`, `"review"`, `"published"`).
    pub status: String,
    /// Body text.
    pub body: Option<String>,
    /// Canonical URL once published.
    pub url: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// Create a content item.
///
/// # Errors
///
/// Returns a storage error when the insert fails.
pub async fn add_content(
    pool: &SqlitePool,
    title: &str,
    kind: &str,
    body: Option<&str>,
    tags: &[String],
) -> CoreResult<i64> {
    let tags_json = serde_json::to_string(tags)?;
    let result = sqlx::query(
        "INSERT INTO content_items (title, kind, body, tags) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(title)
    .bind(kind)
    .bind(body)
    .bind(tags_json)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// List content items by workflow status.
///
/// # Errors
///
/// Returns a storage error when the query fails.
pub async fn list_content(
    pool: &SqlitePool,
    status: Option<&str>,
    limit: usize,
) -> CoreResult<Vec<ContentItem>> {
    let rows: Vec<(i64, String, String, String, Option<String>, Option<String>, String)> =
        sqlx::query_as(
            "SELECT id, title, kind, status, body, url, tags FROM content_items \
             WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
        )
        .bind(status)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await?;

    rows.into_iter()
        .map(|(id, title, kind, status, body, url, tags)| {
            Ok(ContentItem {
                id,
                title,
                kind,
                status,
                body,
                url,
                tags: serde_json::from_str(&tags)
                    .map_err(|e| CoreError::Parse(format!("content tags: {e}")))?,
            })
        })
        .collect()
}
