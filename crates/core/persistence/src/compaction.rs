//! Compaction engine.
//!
//! Folds a doc's accumulated update log into a single snapshot, atomically
//! replacing the update range it consumed. Everything runs inside one
//! database transaction, so the log shortens only when the snapshot row is
//! durably written - across crashes included.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use persistence_db::{
    Checksum, NewSnapshot, PersistenceDb, UpdateLogStats, compaction_log, snapshots, updates,
};

use crate::{Error, doc_name};

/// Compaction thresholds and retention.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Compact once a doc accumulates this many updates.
    pub update_threshold: i64,
    /// Compact once a doc's pending update bytes reach this total.
    pub size_threshold_bytes: i64,
    /// Compact once the oldest update is older than this (and at least one
    /// update exists).
    pub age_threshold: Duration,
    /// Snapshots retained per doc after pruning.
    pub keep_snapshots: i64,
    /// Interval of the background sweep, when enabled.
    pub sweep_interval: Duration,
    /// Run the non-blocking compaction check after each flush.
    pub auto_compact: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            update_threshold: 100,
            size_threshold_bytes: 1024 * 1024,
            age_threshold: Duration::from_secs(24 * 60 * 60),
            keep_snapshots: 3,
            sweep_interval: Duration::from_secs(5 * 60),
            auto_compact: true,
        }
    }
}

/// Result of a compaction request.
#[derive(Debug, Clone)]
pub enum CompactOutcome {
    /// The update log was folded into a new snapshot.
    Compacted {
        /// Update records consumed
        compacted_count: usize,
        /// Checksum of the new snapshot
        checksum: Checksum,
        /// Size of the new snapshot blob in bytes
        size_bytes: usize,
    },
    /// Nothing to do: thresholds not met, or the log was empty.
    Skipped {
        /// Updates currently in the log
        update_count: i64,
    },
}

/// The compaction decision function.
///
/// True iff the update count or byte total reached its threshold, or the
/// oldest update exceeded the age threshold with at least one update pending.
pub(crate) fn should_compact(
    stats: &UpdateLogStats,
    now: DateTime<Utc>,
    config: &CompactionConfig,
) -> bool {
    if stats.count >= config.update_threshold {
        return true;
    }
    if stats.total_bytes >= config.size_threshold_bytes {
        return true;
    }
    if stats.count >= 1 {
        if let Some(oldest) = stats.oldest {
            let age = (now - oldest).to_std().unwrap_or(Duration::ZERO);
            if age >= config.age_threshold {
                return true;
            }
        }
    }
    false
}

/// Runs one compaction for a doc.
///
/// With `force = false` the thresholds are checked first and the run is
/// skipped when none is met. An empty log is always a no-op.
///
/// The transaction:
/// 1. reads the latest snapshot and the full update log;
/// 2. rebuilds the document state via the codec and encodes a new snapshot;
/// 3. inserts the snapshot, deletes the consumed update range (bounded to
///    the `(timestamp, id)` cut observed in step 1, so concurrent appends
///    survive), prunes retained snapshots, and records a compaction-log row.
///
/// Any error rolls the whole transaction back; the engine itself never
/// retries.
pub(crate) async fn compact_doc(
    db: &PersistenceDb,
    doc: &str,
    config: &CompactionConfig,
    force: bool,
) -> Result<CompactOutcome, Error> {
    let started = Instant::now();

    let stats = db.update_log_stats(doc).await?;
    if stats.is_empty() {
        return Ok(CompactOutcome::Skipped { update_count: 0 });
    }
    if !force && !should_compact(&stats, Utc::now(), config) {
        return Ok(CompactOutcome::Skipped {
            update_count: stats.count,
        });
    }

    let mut txn = db.begin_txn().await?;

    let previous = snapshots::sql::latest(&mut txn, doc)
        .await
        .map_err(persistence_db::Error::Database)?;
    let pending = updates::sql::list_all(&mut txn, doc)
        .await
        .map_err(persistence_db::Error::Database)?;
    let Some(newest) = pending.last() else {
        txn.commit().await?;
        return Ok(CompactOutcome::Skipped { update_count: 0 });
    };

    // The cut below which the log is truncated: updates committing after the
    // read above land outside it and survive.
    let max_timestamp = newest.timestamp;
    let max_id = pending.iter().map(|u| u.id).max().unwrap_or(newest.id);
    let consumed = pending.len();

    let state = doc_codec::fold(
        previous.as_ref().map(|s| s.state.as_slice()),
        pending.iter().map(|u| u.payload.as_slice()),
    )?;

    let snapshot = snapshots::save(
        &mut txn,
        NewSnapshot {
            doc_name: doc,
            note_id: doc_name::note_id_of(doc),
            state: &state,
            expected_checksum: None,
            update_count: Some(consumed as i32),
            // The sidecar is opaque metadata; carry the previous one forward.
            panels: previous.as_ref().and_then(|s| s.panels.as_ref()),
        },
    )
    .await?;

    let deleted = updates::sql::delete_through(&mut txn, doc, max_timestamp, max_id)
        .await
        .map_err(persistence_db::Error::Database)?;
    snapshots::sql::prune_to_last(&mut txn, doc, config.keep_snapshots)
        .await
        .map_err(persistence_db::Error::Database)?;

    let duration_ms = started.elapsed().as_millis() as i32;
    compaction_log::insert(
        &mut txn,
        doc,
        consumed as i32,
        (consumed as u64).saturating_sub(deleted) as i32,
        state.len() as i32,
        duration_ms,
    )
    .await
    .map_err(persistence_db::Error::Database)?;

    txn.commit().await?;

    tracing::info!(
        doc_name = %doc,
        compacted_count = consumed,
        snapshot_size = state.len(),
        duration_ms,
        "compacted update log into snapshot"
    );

    Ok(CompactOutcome::Compacted {
        compacted_count: consumed,
        checksum: snapshot.checksum,
        size_bytes: state.len(),
    })
}
