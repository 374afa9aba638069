//! Snapshot module for the persistence database
//!
//! A snapshot is a full encoding of a doc's CRDT state at some point in time,
//! stored with an integrity checksum over the state blob. Snapshots are
//! immutable once written; retention pruning and delete cascades are the only
//! operations that remove them.

use sqlx::types::{
    JsonValue,
    chrono::{DateTime, Utc},
};
use uuid::Uuid;

mod checksum;
pub mod sql;

pub use self::checksum::{Checksum, ChecksumParseError};
use crate::{Error, db::Executor};

/// A stored snapshot row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Snapshot {
    /// Snapshot id
    pub id: Uuid,
    /// Owning note, when the doc name carries one
    pub note_id: Option<Uuid>,
    /// The doc this snapshot belongs to
    pub doc_name: String,
    /// Full CRDT state blob
    pub state: Vec<u8>,
    /// Lowercase hex SHA-256 of `state`
    pub checksum: Checksum,
    /// Number of updates folded into this snapshot, if known
    pub update_count: Option<i32>,
    /// Size of `state` in bytes, if recorded
    pub size_bytes: Option<i32>,
    /// Opaque panels sidecar carried for the annotation UI
    pub panels: Option<JsonValue>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Parameters for writing a new snapshot.
#[derive(Debug)]
pub struct NewSnapshot<'a> {
    /// The doc the snapshot belongs to
    pub doc_name: &'a str,
    /// Owning note id, if the doc name carries one
    pub note_id: Option<Uuid>,
    /// Full CRDT state blob
    pub state: &'a [u8],
    /// Caller-computed checksum to verify against, if any
    pub expected_checksum: Option<&'a Checksum>,
    /// Number of updates folded into the snapshot, if known
    pub update_count: Option<i32>,
    /// Opaque panels sidecar
    pub panels: Option<&'a JsonValue>,
}

/// Verifies the checksum and inserts one snapshot row.
///
/// The checksum stored is always the one computed here over the actual state
/// blob. If the caller supplied an expected checksum and it does not match,
/// the write is rejected with [`Error::ChecksumMismatch`] and nothing is
/// stored.
pub async fn save<'c, E>(exe: E, snapshot: NewSnapshot<'_>) -> Result<Snapshot, Error>
where
    E: Executor<'c>,
{
    let computed = Checksum::of(snapshot.state);
    if let Some(expected) = snapshot.expected_checksum {
        if *expected != computed {
            return Err(Error::ChecksumMismatch {
                expected: expected.clone(),
                computed,
            });
        }
    }

    let size_bytes = snapshot.state.len() as i32;
    sql::insert(
        exe,
        snapshot.doc_name,
        snapshot.note_id,
        snapshot.state,
        &computed,
        snapshot.update_count,
        size_bytes,
        snapshot.panels,
    )
    .await
    .map_err(Error::Database)
}
