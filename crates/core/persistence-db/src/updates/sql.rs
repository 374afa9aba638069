//! Internal SQL operations for the update log

use sqlx::{
    Executor, Postgres,
    types::chrono::{DateTime, Utc},
};

use super::{UpdateId, UpdateLogStats, UpdateRecord};

/// Insert one update record with a server-assigned timestamp.
///
/// Returns the assigned `(id, timestamp)` pair.
pub async fn insert<'c, E>(
    exe: E,
    doc_name: &str,
    payload: &[u8],
    client_id: Option<&str>,
) -> Result<(UpdateId, DateTime<Utc>), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO updates (doc_name, "update", client_id, timestamp)
        VALUES ($1, $2, $3, (timezone('utc', now())))
        RETURNING id, timestamp
    "#};
    let res = sqlx::query_as(query)
        .bind(doc_name)
        .bind(payload)
        .bind(client_id)
        .fetch_one(exe)
        .await?;
    Ok(res)
}

/// List all update records for a doc in `(timestamp, id)` ascending order.
pub async fn list_all<'c, E>(exe: E, doc_name: &str) -> Result<Vec<UpdateRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, doc_name, "update", client_id, timestamp
        FROM updates
        WHERE doc_name = $1
        ORDER BY timestamp ASC, id ASC
    "#};
    sqlx::query_as(query).bind(doc_name).fetch_all(exe).await
}

/// List update records at or after the cutoff, in `(timestamp, id)` ascending order.
///
/// The cutoff is inclusive: an update whose timestamp equals the latest
/// snapshot's creation time may already be folded into that snapshot, but
/// re-applying a CRDT update is a no-op, while an exclusive bound could skip
/// rows that committed around the snapshot cut.
pub async fn list_since<'c, E>(
    exe: E,
    doc_name: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<UpdateRecord>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, doc_name, "update", client_id, timestamp
        FROM updates
        WHERE doc_name = $1 AND timestamp >= $2
        ORDER BY timestamp ASC, id ASC
    "#};
    sqlx::query_as(query)
        .bind(doc_name)
        .bind(cutoff)
        .fetch_all(exe)
        .await
}

/// Aggregate count, byte total, and timestamp range for a doc's log.
///
/// All four values come back from a single scan; the compaction decision
/// runs this on every check.
pub async fn stats<'c, E>(exe: E, doc_name: &str) -> Result<UpdateLogStats, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT COUNT(*) AS count
             , COALESCE(SUM(length("update")), 0)::BIGINT AS total_bytes
             , MIN(timestamp) AS oldest
             , MAX(timestamp) AS newest
        FROM updates
        WHERE doc_name = $1
    "#};
    sqlx::query_as(query).bind(doc_name).fetch_one(exe).await
}

/// Delete every update record for a doc. Returns the number of deleted rows.
pub async fn delete_all<'c, E>(exe: E, doc_name: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM updates WHERE doc_name = $1";
    let res = sqlx::query(query).bind(doc_name).execute(exe).await?;
    Ok(res.rows_affected())
}

/// Delete update records strictly older than the given timestamp.
pub async fn delete_before<'c, E>(
    exe: E,
    doc_name: &str,
    before: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "DELETE FROM updates WHERE doc_name = $1 AND timestamp < $2";
    let res = sqlx::query(query)
        .bind(doc_name)
        .bind(before)
        .execute(exe)
        .await?;
    Ok(res.rows_affected())
}

/// Bounded delete used by the compaction transaction.
///
/// Only removes rows at or below the `(max_timestamp, max_id)` cut observed
/// when the compaction read the log. Updates that committed after that read
/// fall outside the bound and survive, so they are never lost to the
/// truncation.
pub async fn delete_through<'c, E>(
    exe: E,
    doc_name: &str,
    max_timestamp: DateTime<Utc>,
    max_id: UpdateId,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM updates
        WHERE doc_name = $1 AND timestamp <= $2 AND id <= $3
    "#};
    let res = sqlx::query(query)
        .bind(doc_name)
        .bind(max_timestamp)
        .bind(max_id)
        .execute(exe)
        .await?;
    Ok(res.rows_affected())
}

/// All doc names currently holding update records.
///
/// Drives the background compaction sweep; docs with an empty log have
/// nothing to compact and are not listed.
pub async fn distinct_docs<'c, E>(exe: E) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = "SELECT DISTINCT doc_name FROM updates";
    sqlx::query_scalar(query).fetch_all(exe).await
}

/// Delete update records for a set of doc names and `LIKE` patterns.
///
/// Used by the document delete cascade, which purges `note:<id>` exactly and
/// `panel:<pid>:%` by pattern in one statement.
pub async fn delete_for_docs<'c, E>(
    exe: E,
    doc_names: &[String],
    doc_patterns: &[String],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        DELETE FROM updates
        WHERE doc_name = ANY($1) OR doc_name LIKE ANY($2)
    "#};
    let res = sqlx::query(query)
        .bind(doc_names)
        .bind(doc_patterns)
        .execute(exe)
        .await?;
    Ok(res.rows_affected())
}
