//! Annotation table operations for the persistence database
//!
//! The `notes`, `panels`, and `branches` schemas belong to the application
//! layer; the core touches only `id`, `note_id`, and the nullable
//! `deleted_at` soft-delete marker, as part of document delete cascades.

use sqlx::{Executor, Postgres, types::chrono::{DateTime, Utc}};
use uuid::Uuid;

/// Set `deleted_at` on a note row. Returns `false` if no such note exists.
///
/// Already-deleted notes keep their original marker, which is what makes a
/// repeated soft delete a no-op.
pub async fn mark_note_deleted<'c, E>(exe: E, note_id: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE notes
        SET deleted_at = COALESCE(deleted_at, timezone('utc', now()))
        WHERE id = $1
    "#};
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected() > 0)
}

/// Set `deleted_at` on all panel rows of a note. Returns the marked count.
pub async fn mark_panels_deleted<'c, E>(exe: E, note_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE panels
        SET deleted_at = COALESCE(deleted_at, timezone('utc', now()))
        WHERE note_id = $1
    "#};
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected())
}

/// Set `deleted_at` on all branch rows of a note. Returns the marked count.
pub async fn mark_branches_deleted<'c, E>(exe: E, note_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE branches
        SET deleted_at = COALESCE(deleted_at, timezone('utc', now()))
        WHERE note_id = $1
    "#};
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected())
}

/// List the panel ids belonging to a note, including soft-deleted panels.
///
/// The delete cascade purges the update log and snapshots for every panel
/// doc, so soft-deleted panels must be included.
pub async fn panel_ids<'c, E>(exe: E, note_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "SELECT id FROM panels WHERE note_id = $1";
    sqlx::query_scalar(query).bind(note_id).fetch_all(exe).await
}

/// The note's `deleted_at` marker; `None` if the note row does not exist.
pub async fn note_deleted_at<'c, E>(
    exe: E,
    note_id: Uuid,
) -> Result<Option<Option<DateTime<Utc>>>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "SELECT deleted_at FROM notes WHERE id = $1";
    sqlx::query_scalar(query)
        .bind(note_id)
        .fetch_optional(exe)
        .await
}

/// Hard-delete all branch rows of a note.
pub async fn delete_branch_rows<'c, E>(exe: E, note_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM branches WHERE note_id = $1";
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected())
}

/// Hard-delete all panel rows of a note.
pub async fn delete_panel_rows<'c, E>(exe: E, note_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM panels WHERE note_id = $1";
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected())
}

/// Hard-delete the note row itself. Returns `false` if it did not exist.
pub async fn delete_note_row<'c, E>(exe: E, note_id: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM notes WHERE id = $1";
    let res = sqlx::query(query).bind(note_id).execute(exe).await?;
    Ok(res.rows_affected() > 0)
}

/// Set `deleted_at` on a single panel row. Returns `false` if no such panel.
///
/// Used when a bare `panel:<id>` doc is deleted directly rather than through
/// its note.
pub async fn mark_panel_deleted<'c, E>(exe: E, panel_id: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        UPDATE panels
        SET deleted_at = COALESCE(deleted_at, timezone('utc', now()))
        WHERE id = $1
    "#};
    let res = sqlx::query(query).bind(panel_id).execute(exe).await?;
    Ok(res.rows_affected() > 0)
}

/// Hard-delete a single panel row.
pub async fn delete_panel_row<'c, E>(exe: E, panel_id: Uuid) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM panels WHERE id = $1";
    let res = sqlx::query(query).bind(panel_id).execute(exe).await?;
    Ok(res.rows_affected() > 0)
}

/// Row-seeding helpers for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod seed {
    use super::*;

    /// Insert a note row.
    pub async fn note<'c, E>(exe: E, note_id: Uuid, title: &str) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let query = "INSERT INTO notes (id, title) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(note_id)
            .bind(title)
            .execute(exe)
            .await?;
        Ok(())
    }

    /// Insert a panel row for a note.
    pub async fn panel<'c, E>(exe: E, panel_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let query = "INSERT INTO panels (id, note_id) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(panel_id)
            .bind(note_id)
            .execute(exe)
            .await?;
        Ok(())
    }

    /// Insert a branch row for a note.
    pub async fn branch<'c, E>(exe: E, branch_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let query = "INSERT INTO branches (id, note_id) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(branch_id)
            .bind(note_id)
            .execute(exe)
            .await?;
        Ok(())
    }
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_annotations;
}
