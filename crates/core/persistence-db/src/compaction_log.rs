//! Compaction log module for the persistence database
//!
//! Observability-only record of compaction runs. Nothing reads these rows on
//! any correctness path.

use sqlx::{Executor, Postgres, types::chrono::{DateTime, Utc}};
use uuid::Uuid;

/// One recorded compaction run.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompactionLogEntry {
    /// Entry id
    pub id: Uuid,
    /// The compacted doc
    pub doc_name: String,
    /// Update rows consumed by the run
    pub updates_before: i32,
    /// Update rows remaining after the run (0 unless writes raced the cut)
    pub updates_after: i32,
    /// Size in bytes of the snapshot the run produced
    pub snapshot_size: i32,
    /// Wall-clock duration of the run
    pub duration_ms: i32,
    /// When the run committed
    pub created_at: DateTime<Utc>,
}

/// Record one compaction run.
pub async fn insert<'c, E>(
    exe: E,
    doc_name: &str,
    updates_before: i32,
    updates_after: i32,
    snapshot_size: i32,
    duration_ms: i32,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO compaction_log (doc_name, updates_before, updates_after, snapshot_size, duration_ms, created_at)
        VALUES ($1, $2, $3, $4, $5, (timezone('utc', now())))
    "#};
    sqlx::query(query)
        .bind(doc_name)
        .bind(updates_before)
        .bind(updates_after)
        .bind(snapshot_size)
        .bind(duration_ms)
        .execute(exe)
        .await?;
    Ok(())
}

/// The most recent compaction runs for a doc, newest first.
pub async fn recent<'c, E>(
    exe: E,
    doc_name: &str,
    limit: i64,
) -> Result<Vec<CompactionLogEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, doc_name, updates_before, updates_after, snapshot_size, duration_ms, created_at
        FROM compaction_log
        WHERE doc_name = $1
        ORDER BY created_at DESC
        LIMIT $2
    "#};
    sqlx::query_as(query)
        .bind(doc_name)
        .bind(limit)
        .fetch_all(exe)
        .await
}
