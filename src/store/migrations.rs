//! Idempotent schema bootstrap and self-detecting migrations.
//!
//! The numbered SQL files under `migrations/` create every table with
//! `IF NOT EXISTS`, so applying them repeatedly is a no-op. In-code
//! migrations follow: each one inspects the live schema (column probe or
//! probe insert) and only acts when the database predates the change.
//! Constraint changes use the rebuild pattern: create the new table, copy
//! rows, drop the old one, rename, recreate indexes — all in one
//! transaction with foreign keys suspended on that connection.

use sqlx::{Acquire, Row, SqlitePool};
use tracing::{debug, info};

use crate::errors::CoreResult;

/// Schema files applied in order on every startup.
const SCHEMA_FILES: &[(&str, &str)] = &[
    ("001_schema", include_str!("../../migrations/001_schema.sql")),
    ("002_memory", include_str!("../../migrations/002_memory.sql")),
    ("003_recall", include_str!("../../migrations/003_recall.sql")),
    ("004_pipeline", include_str!("../../migrations/004_pipeline.sql")),
];

/// Run the full migration sequence. Safe to call any number of times.
///
/// # Errors
///
/// Returns an error when a statement fails for a reason other than the
/// self-detected conditions each migration handles.
pub async fn run(pool: &SqlitePool) -> CoreResult<()> {
    for (name, sql) in SCHEMA_FILES {
        sqlx::raw_sql(sql).execute(pool).await?;
        debug!(migration = name, "schema file applied");
    }

    // Additive column migrations for databases created before the column
    // existed. ALTER TABLE ADD COLUMN is cheap and non-destructive.
    ensure_column(pool, "pipeline", "health_check", "TEXT").await?;
    ensure_column(pool, "pipeline", "assigned_agent", "TEXT").await?;
    ensure_column(
        pool,
        "session_files",
        "index_time_ms",
        "INTEGER NOT NULL DEFAULT 0",
    )
    .await?;

    // Constraint migration: old databases carried a narrower stage CHECK
    // that predates the dependency stages. Probe with a rolled-back insert;
    // rebuild only when the probe fails.
    ensure_pipeline_stage_constraint(pool).await?;

    Ok(())
}

/// Returns `true` when `table` has a column named `column`.
async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> CoreResult<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

/// Add a column when it is missing. No-op otherwise.
async fn ensure_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> CoreResult<()> {
    if column_exists(pool, table, column).await? {
        return Ok(());
    }
    sqlx::query(&format!(
        "ALTER TABLE {table} ADD COLUMN {column} {definition}"
    ))
    .execute(pool)
    .await?;
    info!(table, column, "added missing column");
    Ok(())
}

/// Probe the pipeline stage CHECK with a throwaway insert; rebuild the
/// table when the constraint rejects a stage the current schema allows.
async fn ensure_pipeline_stage_constraint(pool: &SqlitePool) -> CoreResult<()> {
    let mut conn = pool.acquire().await?;

    let mut tx = conn.begin().await?;
    let probe = sqlx::query(
        "INSERT INTO pipeline (type, title, stage) VALUES ('dependency', '__probe__', 'waiting')",
    )
    .execute(&mut *tx)
    .await;
    // Never keep the probe row, even when it succeeded.
    tx.rollback().await?;

    match probe {
        Ok(_) => Ok(()),
        Err(e) if is_check_violation(&e) => {
            info!("pipeline stage constraint is stale, rebuilding table");
            rebuild_pipeline_table(pool).await
        }
        Err(e) => Err(e.into()),
    }
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("CHECK constraint failed"))
}

/// Rebuild `pipeline` with the current CHECK constraint, copying all rows.
///
/// Foreign keys are suspended on the connection for the duration so the
/// drop/rename pair does not trip referential checks from child tables.
async fn rebuild_pipeline_table(pool: &SqlitePool) -> CoreResult<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await?;

    let result = async {
        let mut tx = conn.begin().await?;

        sqlx::raw_sql(
            "CREATE TABLE pipeline_rebuild (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                type                TEXT NOT NULL DEFAULT 'feature'
                                    CHECK (type IN ('feature', 'story', 'risk', 'issue',
                                                    'assumption', 'dependency')),
                parent_id           INTEGER REFERENCES pipeline(id),
                project_id          INTEGER REFERENCES projects(id),
                title               TEXT NOT NULL,
                description         TEXT,
                stage               TEXT NOT NULL
                                    CHECK (stage IN ('idea', 'spec', 'spec-review', 'building',
                                                     'final-review', 'live', 'backlog',
                                                     'in-progress', 'qa', 'done', 'blocked',
                                                     'identified', 'mitigating', 'resolved',
                                                     'accepted', 'investigating', 'validated',
                                                     'invalidated', 'waiting', 'ready',
                                                     'build', 'review')),
                spec_doc            TEXT,
                acceptance_criteria TEXT NOT NULL DEFAULT '[]',
                approved_by         TEXT,
                approved_at         TEXT,
                branch_name         TEXT,
                review_notes        TEXT,
                review_passed       INTEGER NOT NULL DEFAULT 0,
                health_check        TEXT,
                priority            INTEGER NOT NULL DEFAULT 3 CHECK (priority BETWEEN 1 AND 4),
                assigned_agent      TEXT,
                assigned_to         TEXT,
                started_at          TEXT,
                completed_at        TEXT,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::raw_sql(
            "INSERT INTO pipeline_rebuild
             SELECT id, type, parent_id, project_id, title, description, stage,
                    spec_doc, acceptance_criteria, approved_by, approved_at,
                    branch_name, review_notes, review_passed, health_check,
                    priority, assigned_agent, assigned_to, started_at,
                    completed_at, created_at, updated_at
             FROM pipeline;
             DROP TABLE pipeline;
             ALTER TABLE pipeline_rebuild RENAME TO pipeline;
             CREATE INDEX IF NOT EXISTS idx_pipeline_stage ON pipeline(stage);
             CREATE INDEX IF NOT EXISTS idx_pipeline_parent ON pipeline(parent_id);
             CREATE INDEX IF NOT EXISTS idx_pipeline_project ON pipeline(project_id);",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
    .await;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    result
}
