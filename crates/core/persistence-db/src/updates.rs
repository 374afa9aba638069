//! Update log module for the persistence database
//!
//! One row per persisted CRDT update blob. The log is append-only from the
//! writer's perspective; rows only disappear through compaction (bounded
//! delete inside the compaction transaction) or a document delete cascade.
//!
//! Ordering within a doc is always `(timestamp ASC, id ASC)`. Timestamps are
//! server-assigned and can collide; the monotonic id breaks ties.

use sqlx::types::chrono::{DateTime, Utc};

pub mod sql;
mod update_id;

pub use self::update_id::{UpdateId, UpdateIdFromStrError, UpdateIdI64ConvError};

/// A persisted update record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpdateRecord {
    /// Server-assigned monotonic record id
    pub id: UpdateId,
    /// The doc this update belongs to
    pub doc_name: String,
    /// The opaque CRDT update blob
    #[sqlx(rename = "update")]
    pub payload: Vec<u8>,
    /// Opaque caller-supplied producer identifier, for observability only
    pub client_id: Option<String>,
    /// Server timestamp assigned at insert
    pub timestamp: DateTime<Utc>,
}

/// Cheap aggregates over a doc's update log, used by the compaction decision.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct UpdateLogStats {
    /// Number of update rows
    pub count: i64,
    /// Sum of payload sizes in bytes
    pub total_bytes: i64,
    /// Timestamp of the oldest update, if any
    pub oldest: Option<DateTime<Utc>>,
    /// Timestamp of the newest update, if any
    pub newest: Option<DateTime<Utc>>,
}

impl UpdateLogStats {
    /// `true` if the log holds no updates for the doc.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
