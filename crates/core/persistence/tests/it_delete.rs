//! Delete-cascade integration tests against a temporary database.

use std::time::Duration;

use bytes::Bytes;
use doc_batcher::BatchConfig;
use persistence::{CompactionConfig, DeleteMode, Error, HARD_DELETE_CONFIRMATION, PersistenceService};
use persistence_db::{TempPersistenceDb, annotations};
use uuid::Uuid;
use yrs::{Doc, ReadTxn, StateVector, Text, Transact};

fn text_update(content: &str) -> Vec<u8> {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("content");
    let mut txn = doc.transact_mut();
    text.insert(&mut txn, 0, content);
    drop(txn);
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}

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

/// A note with three panels, a branch, and CRDT data on every doc.
struct SeededNote {
    note_id: Uuid,
    note_doc: String,
    panel_ids: Vec<Uuid>,
}

async fn seed_note(service: &PersistenceService, db: &TempPersistenceDb) -> SeededNote {
    let note_id = Uuid::new_v4();
    annotations::seed::note(db.db(), note_id, "seeded note")
        .await
        .expect("Failed to seed note");

    let mut panel_ids = Vec::new();
    for _ in 0..3 {
        let panel_id = Uuid::new_v4();
        annotations::seed::panel(db.db(), panel_id, note_id)
            .await
            .expect("Failed to seed panel");
        panel_ids.push(panel_id);
    }
    annotations::seed::branch(db.db(), Uuid::new_v4(), note_id)
        .await
        .expect("Failed to seed branch");

    let note_doc = format!("note:{note_id}");
    for i in 0..20 {
        service
            .persist(&note_doc, Bytes::from(text_update(&format!("n{i}"))), None)
            .await
            .expect("Failed to persist note update");
    }
    for panel_id in &panel_ids {
        let panel_doc = format!("panel:{panel_id}");
        let sub_doc = format!("panel:{panel_id}:annotations");
        for i in 0..20 {
            service
                .persist(&panel_doc, Bytes::from(text_update(&format!("p{i}"))), None)
                .await
                .expect("Failed to persist panel update");
        }
        service
            .persist(&sub_doc, Bytes::from(text_update("sub")), None)
            .await
            .expect("Failed to persist sub-doc update");
        service
            .save_snapshot(&panel_doc, text_update("panel snapshot"), None)
            .await
            .expect("Failed to save panel snapshot");
    }
    service
        .save_snapshot(&note_doc, text_update("note snapshot"), None)
        .await
        .expect("Failed to save note snapshot");

    SeededNote {
        note_id,
        note_doc,
        panel_ids,
    }
}

#[tokio::test]
async fn soft_delete_cascades_and_is_idempotent() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let seeded = seed_note(&service, &temp_db).await;

    //* When
    service
        .delete_doc(&seeded.note_doc, DeleteMode::Soft, None)
        .await
        .expect("Failed to soft delete");

    //* Then: no CRDT rows remain for the note doc or any panel doc
    assert!(
        service
            .read_all(&seeded.note_doc)
            .await
            .expect("Failed to read")
            .is_empty()
    );
    assert!(
        service
            .load_snapshot(&seeded.note_doc, None)
            .await
            .expect("Failed to load snapshot")
            .is_none()
    );
    for panel_id in &seeded.panel_ids {
        let panel_doc = format!("panel:{panel_id}");
        assert!(
            service
                .read_all(&panel_doc)
                .await
                .expect("Failed to read")
                .is_empty()
        );
        assert!(
            service
                .read_all(&format!("panel:{panel_id}:annotations"))
                .await
                .expect("Failed to read")
                .is_empty()
        );
        assert!(
            service
                .load_snapshot(&panel_doc, None)
                .await
                .expect("Failed to load snapshot")
                .is_none()
        );
    }

    // Markers are set on the note row
    let deleted_at = annotations::note_deleted_at(temp_db.db(), seeded.note_id)
        .await
        .expect("Failed to query note")
        .expect("Note row must still exist after soft delete");
    assert!(deleted_at.is_some());

    // A second soft delete is a successful no-op
    service
        .delete_doc(&seeded.note_doc, DeleteMode::Soft, None)
        .await
        .expect("Repeat soft delete must succeed");
}

#[tokio::test]
async fn hard_delete_requires_confirmation_token() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let seeded = seed_note(&service, &temp_db).await;

    //* When
    let missing = service
        .delete_doc(&seeded.note_doc, DeleteMode::Hard, None)
        .await;
    let wrong = service
        .delete_doc(&seeded.note_doc, DeleteMode::Hard, Some("yes please"))
        .await;

    //* Then: refused, and nothing was mutated
    assert!(matches!(missing, Err(Error::Authorization(_))));
    assert!(matches!(wrong, Err(Error::Authorization(_))));
    assert!(
        !service
            .read_all(&seeded.note_doc)
            .await
            .expect("Failed to read")
            .is_empty()
    );
    let deleted_at = annotations::note_deleted_at(temp_db.db(), seeded.note_id)
        .await
        .expect("Failed to query note")
        .expect("Note row must still exist");
    assert!(deleted_at.is_none());
}

#[tokio::test]
async fn hard_delete_after_soft_delete_removes_rows() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");
    let seeded = seed_note(&service, &temp_db).await;

    service
        .delete_doc(&seeded.note_doc, DeleteMode::Soft, None)
        .await
        .expect("Failed to soft delete");

    //* When
    service
        .delete_doc(
            &seeded.note_doc,
            DeleteMode::Hard,
            Some(HARD_DELETE_CONFIRMATION),
        )
        .await
        .expect("Failed to hard delete");

    //* Then: the note row is gone entirely
    let row = annotations::note_deleted_at(temp_db.db(), seeded.note_id)
        .await
        .expect("Failed to query note");
    assert!(row.is_none());
    assert!(
        annotations::panel_ids(temp_db.db(), seeded.note_id)
            .await
            .expect("Failed to list panels")
            .is_empty()
    );
}

#[tokio::test]
async fn delete_of_missing_note_reports_not_found() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When
    let result = service
        .delete_doc(&format!("note:{}", Uuid::new_v4()), DeleteMode::Soft, None)
        .await;

    //* Then
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn delete_rejects_malformed_doc_names() {
    //* Given
    let temp_db = TempPersistenceDb::new().await;
    let service = PersistenceService::new(
        temp_db.db().clone(),
        manual_batching(),
        no_auto_compaction(),
    )
    .expect("Failed to build service");

    //* When / Then
    let unknown = service
        .delete_doc("whiteboard:w1", DeleteMode::Soft, None)
        .await;
    assert!(matches!(unknown, Err(Error::Validation(_))));

    let bad_id = service
        .delete_doc("note:not-a-uuid", DeleteMode::Soft, None)
        .await;
    assert!(matches!(bad_id, Err(Error::Validation(_))));
}
