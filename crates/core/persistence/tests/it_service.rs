//! Service-level integration tests against a temporary database.

use std::time::Duration;

use bytes::Bytes;
use doc_batcher::BatchConfig;
use persistence::{
    CompactOutcome, CompactionConfig, Error, PersistenceService, SaveSnapshotOutcome,
};
use persistence_db::{PersistenceDb, PoolConfig, TempPersistenceDb};
use uuid::Uuid;
use yrs::{
    Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, updates::decoder::Decode,
};

/// Encodes an update blob inserting `content` at the given offset.
fn text_update(content: &str) -> Vec<u8> {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("content");
    let mut txn = doc.transact_mut();
    text.insert(&mut txn, 0, content);
    drop(txn);
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}

/// Reads the "content" text back out of a state blob.
fn text_of(blob: &[u8]) -> String {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("content");
    let mut txn = doc.transact_mut();
    txn.apply_update(Update::decode_v1(blob).expect("decode blob"))
        .expect("apply blob");
    drop(txn);
    text.get_string(&doc.transact())
}

/// Canonical re-encoding of a state blob, for byte-equality comparisons.
fn canonical(blob: &[u8]) -> Vec<u8> {
    let doc = Doc::new();
    let mut txn = doc.transact_mut();
    txn.apply_update(Update::decode_v1(blob).expect("decode blob"))
        .expect("apply blob");
    drop(txn);
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}

/// Batch config with unreachable timers so only explicit flushes happen.
fn manual_batching() -> BatchConfig {
    BatchConfig {
        max_batch_count: 1000,
        max_batch_bytes: 16 * 1024 * 1024,
        batch_timeout: Duration::from_secs(3600),
        debounce: Duration::from_secs(3600),
        coalesce: true,
    }
}

fn no_auto_compaction() -> CompactionConfig {
    CompactionConfig {
        auto_compact: false,
        ..CompactionConfig::default()
    }
}

fn note_doc() -> String {
    format!("note:{}", Uuid::new_v4())
}

#[tokio::test]
async fn basic_round_trip() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();

    //* When
    service
        .persist(&doc, Bytes::from(text_update("Hello")), Some("c1".into()))
        .await
        .expect("Failed to persist");
    let blob = service
        .load(&doc)
        .await
        .expect("Failed to load")
        .expect("Doc should exist after persist");

    //* Then
    assert_eq!(text_of(&blob), "Hello");
}

#[tokio::test]
async fn load_of_unknown_doc_returns_none() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When
    let blob = service.load(&note_doc()).await.expect("Failed to load");

    //* Then
    assert!(blob.is_none());
}

#[tokio::test]
async fn persist_validates_inputs() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When / Then
    let empty_payload = service.persist(&note_doc(), Bytes::new(), None).await;
    assert!(matches!(empty_payload, Err(Error::Validation(_))));

    let empty_doc = service
        .persist("", Bytes::from(text_update("x")), None)
        .await;
    assert!(matches!(empty_doc, Err(Error::Validation(_))));
}

#[tokio::test]
async fn count_bound_coalesces_to_one_log_record() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let batch = BatchConfig {
        max_batch_count: 5,
        ..manual_batching()
    };
    let service = PersistenceService::new(temp_db.db().clone(), batch, no_auto_compaction())
        .expect("Failed to build service");
    let doc = note_doc();

    //* When
    for i in 0..5 {
        service
            .persist(&doc, Bytes::from(text_update(&format!("x{i}"))), None)
            .await
            .expect("Failed to persist");
    }

    //* Then
    let records = service.read_all(&doc).await.expect("Failed to read");
    assert_eq!(records.len(), 1, "five persists must coalesce into one row");

    let metrics = service.batch_metrics();
    assert_eq!(metrics.enqueued, 5);
    assert_eq!(metrics.appended_records, 1);
    assert!(metrics.compression_ratio > 1.0);
}

#[tokio::test]
async fn forced_compaction_preserves_state_and_truncates_log() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();

    let alphabet = "abcdefghijklmnopqrstuvwxyz";
    for c in alphabet.chars() {
        service
            .persist(&doc, Bytes::from(text_update(&c.to_string())), None)
            .await
            .expect("Failed to persist");
    }

    let before = service
        .load(&doc)
        .await
        .expect("Failed to load before compaction")
        .expect("Doc should exist");

    //* When
    let outcome = service
        .compact(&doc, true)
        .await
        .expect("Failed to compact");

    //* Then
    let CompactOutcome::Compacted {
        compacted_count,
        checksum,
        size_bytes,
    } = outcome
    else {
        panic!("forced compaction of a non-empty log must compact");
    };
    assert!(compacted_count >= 1);
    assert!(size_bytes > 0);

    let after = service
        .load(&doc)
        .await
        .expect("Failed to load after compaction")
        .expect("Doc should exist");
    assert_eq!(canonical(&before), canonical(&after));
    assert_eq!(text_of(&before).len(), alphabet.len());

    let records = service.read_all(&doc).await.expect("Failed to read");
    assert!(records.is_empty(), "compaction must truncate the log");

    let snapshot = service
        .load_snapshot(&doc, None)
        .await
        .expect("Failed to load snapshot")
        .expect("Compaction must leave a snapshot");
    assert_eq!(snapshot.checksum, checksum);
    assert_eq!(snapshot.update_count, Some(compacted_count as i32));
}

#[tokio::test]
async fn compaction_of_empty_doc_is_skipped() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When
    let outcome = service
        .compact(&note_doc(), true)
        .await
        .expect("Failed to compact");

    //* Then
    assert!(matches!(
        outcome,
        CompactOutcome::Skipped { update_count: 0 }
    ));
}

#[tokio::test]
async fn compaction_respects_retention() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let compaction = CompactionConfig {
        keep_snapshots: 2,
        ..no_auto_compaction()
    };
    let service = PersistenceService::new(temp_db.db().clone(), manual_batching(), compaction)
        .expect("Failed to build service");
    let doc = note_doc();

    //* When: four compaction rounds, each with fresh updates
    for round in 0..4 {
        service
            .persist(&doc, Bytes::from(text_update(&format!("r{round}"))), None)
            .await
            .expect("Failed to persist");
        service
            .compact(&doc, true)
            .await
            .expect("Failed to compact");
    }

    //* Then
    let status = service
        .compact_status(&doc)
        .await
        .expect("Failed to read status");
    assert_eq!(status.snapshot_count, 2);
    assert_eq!(status.update_count, 0);
}

#[tokio::test]
async fn snapshot_save_is_idempotent_by_checksum() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();
    let state = text_update("snapshot state");

    //* When
    let first = service
        .save_snapshot(&doc, state.clone(), None)
        .await
        .expect("Failed to save snapshot");
    let second = service
        .save_snapshot(&doc, state.clone(), None)
        .await
        .expect("Failed to re-save snapshot");

    //* Then
    let SaveSnapshotOutcome::Saved(saved) = first else {
        panic!("first save must write a row");
    };
    let SaveSnapshotOutcome::Duplicate { checksum } = second else {
        panic!("second save of identical bytes must be a duplicate");
    };
    assert_eq!(saved.checksum, checksum);

    let status = service
        .compact_status(&doc)
        .await
        .expect("Failed to read status");
    assert_eq!(status.snapshot_count, 1);
}

#[tokio::test]
async fn save_snapshot_rejects_empty_state() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When
    let result = service.save_snapshot(&note_doc(), Vec::new(), None).await;

    //* Then
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn load_snapshot_by_checksum() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();

    let SaveSnapshotOutcome::Saved(older) = service
        .save_snapshot(&doc, text_update("older"), None)
        .await
        .expect("Failed to save older snapshot")
    else {
        panic!("first save must write a row");
    };
    service
        .save_snapshot(&doc, text_update("newer"), None)
        .await
        .expect("Failed to save newer snapshot");

    //* When
    let newest = service
        .load_snapshot(&doc, None)
        .await
        .expect("Failed to load newest")
        .expect("Snapshot should exist");
    let by_checksum = service
        .load_snapshot(&doc, Some(&older.checksum))
        .await
        .expect("Failed to load by checksum")
        .expect("Older snapshot should be addressable");

    //* Then
    assert_eq!(text_of(&newest.state), "newer");
    assert_eq!(by_checksum.id, older.id);
}

#[tokio::test]
async fn clear_updates_leaves_snapshots_alone() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();

    service
        .save_snapshot(&doc, text_update("snap"), None)
        .await
        .expect("Failed to save snapshot");
    service
        .persist(&doc, Bytes::from(text_update("a")), None)
        .await
        .expect("Failed to persist");
    service
        .persist(&doc, Bytes::from(text_update("b")), None)
        .await
        .expect("Failed to persist");

    //* When
    let deleted = service
        .clear_updates(&doc, None)
        .await
        .expect("Failed to clear updates");

    //* Then
    // Two persists coalesce into a single record at the implied flush.
    assert_eq!(deleted, 1);
    assert!(
        service
            .load_snapshot(&doc, None)
            .await
            .expect("Failed to load snapshot")
            .is_some()
    );
}

#[tokio::test]
async fn acknowledged_updates_survive_shutdown() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let doc = note_doc();

    service
        .persist(&doc, Bytes::from(text_update("durable")), None)
        .await
        .expect("Failed to persist");

    //* When: graceful shutdown with the update still queued
    service.shutdown().await.expect("Failed to shut down");

    //* Then: a fresh connection sees the queued update
    let reader_db = PersistenceDb::connect(&temp_db.url(), &PoolConfig::default())
        .await
        .expect("Failed to reconnect");
    let reader = PersistenceService::new(reader_db, manual_batching(), no_auto_compaction())
        .expect("Failed to build reader service");
    let blob = reader
        .load(&doc)
        .await
        .expect("Failed to load")
        .expect("Doc should exist");
    assert_eq!(text_of(&blob), "durable");
}

#[tokio::test]
async fn auto_compaction_runs_after_flush() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let compaction = CompactionConfig {
        update_threshold: 1,
        auto_compact: true,
        ..CompactionConfig::default()
    };
    let service =
        PersistenceService::new(temp_db.db().clone(), BatchConfig::test_profile(), compaction)
            .expect("Failed to build service");
    let doc = note_doc();

    //* When
    service
        .persist(&doc, Bytes::from(text_update("compact me")), None)
        .await
        .expect("Failed to persist");

    //* Then: the post-flush check compacts without any explicit call
    let mut compacted = false;
    for _ in 0..100 {
        let status = service
            .compact_status(&doc)
            .await
            .expect("Failed to read status");
        if status.snapshot_count >= 1 && status.update_count == 0 {
            compacted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(compacted, "auto-compaction should have folded the log");

    let blob = service
        .load(&doc)
        .await
        .expect("Failed to load")
        .expect("Doc should exist");
    assert_eq!(text_of(&blob), "compact me");
}

#[tokio::test]
async fn compact_status_recommends_at_threshold() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let compaction = CompactionConfig {
        update_threshold: 2,
        ..no_auto_compaction()
    };
    let batch = BatchConfig {
        coalesce: false,
        ..manual_batching()
    };
    let service = PersistenceService::new(temp_db.db().clone(), batch, compaction)
        .expect("Failed to build service");
    let doc = note_doc();

    service
        .persist(&doc, Bytes::from(text_update("one")), None)
        .await
        .expect("Failed to persist");
    let below = service
        .compact_status(&doc)
        .await
        .expect("Failed to read status");

    service
        .persist(&doc, Bytes::from(text_update("two")), None)
        .await
        .expect("Failed to persist");
    let at = service
        .compact_status(&doc)
        .await
        .expect("Failed to read status");

    //* Then
    assert!(!below.recommend_compact);
    assert_eq!(at.update_count, 2);
    assert!(at.recommend_compact);
}

#[tokio::test]
async fn health_probe_reports_pool() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When
    let health = service.health().await;

    //* Then
    assert!(health.healthy);
    assert!(health.error.is_none());
    assert!(health.pool.total >= 1);
}
