//! Storage engine: a single SQLite file owning all persistent state.
//!
//! The [`Storage`] handle wraps a [`SqlitePool`] opened in WAL mode. One
//! process owns the file; readers may open concurrently under the WAL but
//! writes are serialised by SQLite. Schema bootstrap and migrations run on
//! open and are idempotent.

pub mod content;
pub mod health;
pub mod knowledge;
pub mod migrations;
pub mod social;
pub mod tasks;
pub mod usage;
pub mod vector;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::CoreResult;

/// Handle to the process-owned database.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open (or create) the database file and run the migration sequence.
    ///
    /// # Errors
    ///
    /// Returns an error when the parent directory cannot be created, the
    /// file cannot be opened, or a migration fails.
    pub async fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot create data directory {}: {e}", parent.display()),
                ))
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        migrations::run(&pool).await?;
        info!(path = %path.display(), "storage engine ready");
        Ok(Self { pool })
    }

    /// Open an in-memory database with the full schema (for tests).
    ///
    /// In-memory databases are per-connection, so the pool is limited to a
    /// single connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool cannot connect or migrations fail.
    pub async fn open_in_memory() -> CoreResult<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Sanitise a user query string for FTS5 MATCH syntax.
///
/// FTS5 treats punctuation and the bare words `OR`/`NOT`/`AND`/`NEAR` as
/// operators; both cause parse errors in naive queries. Strips specials and
/// filters operator keywords, leaving implicit-AND terms.
pub fn sanitise_match_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    const FTS5_KEYWORDS: &[&str] = &["OR", "NOT", "AND", "NEAR"];

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| !FTS5_KEYWORDS.contains(t))
        .collect();
    if tokens.is_empty() {
        return String::new();
    }

    tokens.join(" ")
}
