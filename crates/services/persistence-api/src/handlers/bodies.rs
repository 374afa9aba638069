//! Request and response body types shared between the unified action
//! endpoint and the specialised routes.

use chrono::{DateTime, Utc};
use persistence::{CompactOutcome, CompactStatus, SaveSnapshotOutcome};
use persistence_db::{Checksum, Snapshot, UpdateRecord};
use uuid::Uuid;

use super::encoding::Base64Bytes;

/// One update record on the wire. Payloads are always base64 on output.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    pub update: Base64Bytes,
    pub client_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<UpdateRecord> for UpdateBody {
    fn from(record: UpdateRecord) -> Self {
        Self {
            update: Base64Bytes(record.payload),
            client_id: record.client_id,
            timestamp: record.timestamp,
        }
    }
}

/// Response of `GET /persistence/updates`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateListBody {
    pub doc_name: String,
    pub updates: Vec<UpdateBody>,
    pub count: usize,
}

/// Response of `POST /persistence/updates`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendedBody {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub size: usize,
}

/// Response of `DELETE /persistence/updates`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedBody {
    pub deleted_count: u64,
}

/// Response of `DELETE /persistence/snapshots`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedBody {
    pub pruned_count: u64,
}

/// A snapshot with metadata and blob, as returned by the read paths.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    pub id: Uuid,
    pub doc_name: String,
    pub note_id: Option<Uuid>,
    pub snapshot: Base64Bytes,
    pub checksum: Checksum,
    pub update_count: Option<i32>,
    pub size_bytes: Option<i32>,
    pub panels: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<Snapshot> for SnapshotBody {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            id: snapshot.id,
            doc_name: snapshot.doc_name,
            note_id: snapshot.note_id,
            snapshot: Base64Bytes(snapshot.state),
            checksum: snapshot.checksum,
            update_count: snapshot.update_count,
            size_bytes: snapshot.size_bytes,
            panels: snapshot.panels,
            created_at: snapshot.created_at,
        }
    }
}

/// Response of `POST /persistence/snapshots`: a new row, or a duplicate
/// marker when an identical snapshot already existed.
#[derive(Debug, serde::Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum SaveSnapshotBody {
    Duplicate {
        duplicate: bool,
        checksum: Checksum,
    },
    Saved {
        id: Uuid,
        checksum: Checksum,
        created_at: DateTime<Utc>,
        size: usize,
    },
}

impl From<SaveSnapshotOutcome> for SaveSnapshotBody {
    fn from(outcome: SaveSnapshotOutcome) -> Self {
        match outcome {
            SaveSnapshotOutcome::Duplicate { checksum } => SaveSnapshotBody::Duplicate {
                duplicate: true,
                checksum,
            },
            SaveSnapshotOutcome::Saved(snapshot) => SaveSnapshotBody::Saved {
                id: snapshot.id,
                checksum: snapshot.checksum,
                created_at: snapshot.created_at,
                size: snapshot.state.len(),
            },
        }
    }
}

/// Response of `POST /persistence/compact`.
#[derive(Debug, serde::Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum CompactBody {
    Skipped {
        skipped: bool,
        update_count: i64,
    },
    Compacted {
        compacted_count: usize,
        checksum: Checksum,
        size: usize,
    },
}

impl From<CompactOutcome> for CompactBody {
    fn from(outcome: CompactOutcome) -> Self {
        match outcome {
            CompactOutcome::Skipped { update_count } => CompactBody::Skipped {
                skipped: true,
                update_count,
            },
            CompactOutcome::Compacted {
                compacted_count,
                checksum,
                size_bytes,
            } => CompactBody::Compacted {
                compacted_count,
                checksum,
                size: size_bytes,
            },
        }
    }
}

/// Response of `GET /persistence/compact`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactStatusBody {
    pub doc_name: String,
    pub update_count: i64,
    pub total_bytes: i64,
    pub oldest_update: Option<DateTime<Utc>>,
    pub newest_update: Option<DateTime<Utc>>,
    pub snapshot_count: i64,
    pub latest_snapshot_at: Option<DateTime<Utc>>,
    pub recommend_compact: bool,
}

impl CompactStatusBody {
    pub fn new(doc_name: String, status: CompactStatus) -> Self {
        Self {
            doc_name,
            update_count: status.update_count,
            total_bytes: status.total_bytes,
            oldest_update: status.oldest_update,
            newest_update: status.newest_update,
            snapshot_count: status.snapshot_count,
            latest_snapshot_at: status.latest_snapshot_at,
            recommend_compact: status.recommend_compact,
        }
    }
}

/// Response of the unified `load` action: the merged state blob, if the doc
/// has any persisted data.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBody {
    pub doc_name: String,
    pub state: Option<Base64Bytes>,
}
