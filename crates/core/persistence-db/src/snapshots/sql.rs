//! Internal SQL operations for snapshots

use sqlx::{Executor, Postgres, types::JsonValue};
use uuid::Uuid;

use super::{Checksum, Snapshot};

/// Insert one snapshot row.
///
/// Callers go through [`super::save`], which computes and verifies the
/// checksum; this function trusts its arguments.
#[expect(clippy::too_many_arguments)]
pub(super) async fn insert<'c, E>(
    exe: E,
    doc_name: &str,
    note_id: Option<Uuid>,
    state: &[u8],
    checksum: &Checksum,
    update_count: Option<i32>,
    size_bytes: i32,
    panels: Option<&JsonValue>,
) -> Result<Snapshot, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO snapshots (note_id, doc_name, state, checksum, update_count, size_bytes, panels, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, (timezone('utc', now())))
        RETURNING id, note_id, doc_name, state, checksum, update_count, size_bytes, panels, created_at
    "#};
    sqlx::query_as(query)
        .bind(note_id)
        .bind(doc_name)
        .bind(state)
        .bind(checksum)
        .bind(update_count)
        .bind(size_bytes)
        .bind(panels)
        .fetch_one(exe)
        .await
}

/// Get the most recent snapshot for a doc, if any.
///
/// Ties on `created_at` are broken by id so the result is stable.
pub async fn latest<'c, E>(exe: E, doc_name: &str) -> Result<Option<Snapshot>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, note_id, doc_name, state, checksum, update_count, size_bytes, panels, created_at
        FROM snapshots
        WHERE doc_name = $1
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    "#};
    sqlx::query_as(query)
        .bind(doc_name)
        .fetch_optional(exe)
        .await
}

/// Get a doc's snapshot with the given checksum, if one exists.
///
/// This is what makes `save` idempotent: a caller can probe by checksum and
/// skip the write when an identical snapshot is already stored.
pub async fn by_checksum<'c, E>(
    exe: E,
    doc_name: &str,
    checksum: &Checksum,
) -> Result<Option<Snapshot>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, note_id, doc_name, state, checksum, update_count, size_bytes, panels, created_at
        FROM snapshots
        WHERE doc_name = $1 AND checksum = $2
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    "#};
    sqlx::query_as(query)
        .bind(doc_name)
        .bind(checksum)
        .fetch_optional(exe)
        .await
}

/// Count snapshots stored for a doc.
pub async fn count<'c, E>(exe: E, doc_name: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "SELECT COUNT(*) FROM snapshots WHERE doc_name = $1";
    sqlx::query_scalar(query).bind(doc_name).fetch_one(exe).await
}

/// Delete all but the most recent `keep` snapshots for a doc.
///
/// Returns the number of pruned rows.
pub async fn prune_to_last<'c, E>(exe: E, doc_name: &str, keep: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM snapshots
        WHERE doc_name = $1
              AND id NOT IN (
                  SELECT id
                  FROM snapshots
                  WHERE doc_name = $1
                  ORDER BY created_at DESC, id DESC
                  LIMIT $2
              )
    "#};
    let res = sqlx::query(query)
        .bind(doc_name)
        .bind(keep)
        .execute(exe)
        .await?;
    Ok(res.rows_affected())
}

/// Delete snapshots for a set of doc names and `LIKE` patterns.
///
/// Companion to the update-log purge in the document delete cascade.
pub async fn delete_for_docs<'c, E>(
    exe: E,
    doc_names: &[String],
    doc_patterns: &[String],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM snapshots
        WHERE doc_name = ANY($1) OR doc_name LIKE ANY($2)
    "#};
    let res = sqlx::query(query)
        .bind(doc_names)
        .bind(doc_patterns)
        .execute(exe)
        .await?;
    Ok(res.rows_affected())
}
