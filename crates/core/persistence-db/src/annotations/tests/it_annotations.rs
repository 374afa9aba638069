//! In-tree DB integration tests for annotation soft-delete markers

use pgtemp::PgTempDB;
use uuid::Uuid;

use crate::{PersistenceDb, PoolConfig, annotations};

#[tokio::test]
async fn soft_delete_markers_are_idempotent() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = PersistenceDb::connect_with_retry(&temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to persistence db");

    let note_id = Uuid::new_v4();
    annotations::seed::note(&db, note_id, "test note")
        .await
        .expect("Failed to seed note");

    //* When
    let marked = annotations::mark_note_deleted(&db, note_id)
        .await
        .expect("Failed to mark note deleted");
    let first = annotations::note_deleted_at(&db, note_id)
        .await
        .expect("Failed to read deleted_at")
        .expect("Note not found");

    annotations::mark_note_deleted(&db, note_id)
        .await
        .expect("Failed to re-mark note deleted");
    let second = annotations::note_deleted_at(&db, note_id)
        .await
        .expect("Failed to read deleted_at")
        .expect("Note not found");

    //* Then
    assert!(marked);
    assert!(first.is_some());
    assert_eq!(first, second, "repeat soft delete must keep the original marker");
}

#[tokio::test]
async fn mark_note_deleted_reports_missing_note() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = PersistenceDb::connect_with_retry(&temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to persistence db");

    //* When
    let marked = annotations::mark_note_deleted(&db, Uuid::new_v4())
        .await
        .expect("Failed to run mark");

    //* Then
    assert!(!marked);
}

#[tokio::test]
async fn panel_ids_include_soft_deleted_panels() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = PersistenceDb::connect_with_retry(&temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to persistence db");

    let note_id = Uuid::new_v4();
    annotations::seed::note(&db, note_id, "test note")
        .await
        .expect("Failed to seed note");

    let panel_a = Uuid::new_v4();
    let panel_b = Uuid::new_v4();
    annotations::seed::panel(&db, panel_a, note_id)
        .await
        .expect("Failed to seed panel");
    annotations::seed::panel(&db, panel_b, note_id)
        .await
        .expect("Failed to seed panel");

    annotations::mark_panel_deleted(&db, panel_a)
        .await
        .expect("Failed to mark panel deleted");

    //* When
    let mut ids = annotations::panel_ids(&db, note_id)
        .await
        .expect("Failed to list panel ids");

    //* Then
    ids.sort();
    let mut expected = vec![panel_a, panel_b];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn hard_delete_removes_rows_in_dependency_order() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = PersistenceDb::connect_with_retry(&temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to persistence db");

    let note_id = Uuid::new_v4();
    annotations::seed::note(&db, note_id, "test note")
        .await
        .expect("Failed to seed note");
    annotations::seed::panel(&db, Uuid::new_v4(), note_id)
        .await
        .expect("Failed to seed panel");
    annotations::seed::branch(&db, Uuid::new_v4(), note_id)
        .await
        .expect("Failed to seed branch");

    //* When
    let branches = annotations::delete_branch_rows(&db, note_id)
        .await
        .expect("Failed to delete branches");
    let panels = annotations::delete_panel_rows(&db, note_id)
        .await
        .expect("Failed to delete panels");
    let note = annotations::delete_note_row(&db, note_id)
        .await
        .expect("Failed to delete note");

    //* Then
    assert_eq!(branches, 1);
    assert_eq!(panels, 1);
    assert!(note);
    let gone = annotations::note_deleted_at(&db, note_id)
        .await
        .expect("Failed to query note");
    assert!(gone.is_none());
}
