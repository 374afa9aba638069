//! Document delete coordinator.
//!
//! Deletes cascade across the update log, snapshots, and the annotation
//! tables in one transaction. Soft delete purges the CRDT data and sets
//! `deleted_at` markers; hard delete additionally removes the annotation
//! rows themselves.

use persistence_db::{PersistenceDb, annotations, snapshots, updates};
use uuid::Uuid;

use crate::{
    Error,
    doc_name::{DocNameError, ParsedDocName},
};

/// The literal confirmation token a caller must supply for a hard delete.
pub const HARD_DELETE_CONFIRMATION: &str = "PERMANENTLY-DELETE";

/// Whether a delete keeps the annotation rows (marked) or removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Purge CRDT data, set `deleted_at` markers.
    Soft,
    /// Purge CRDT data, remove annotation rows.
    Hard,
}

/// Deletes a document and everything reachable from it, atomically.
pub(crate) async fn delete_doc(
    db: &PersistenceDb,
    doc: &str,
    mode: DeleteMode,
) -> Result<(), Error> {
    let parsed = ParsedDocName::parse(doc).map_err(|err| match err {
        DocNameError::UnknownPrefix(_) | DocNameError::InvalidId(_) => {
            Error::Validation(err.to_string())
        }
    })?;

    match parsed {
        ParsedDocName::Note { note_id } => delete_note(db, doc, note_id, mode).await?,
        ParsedDocName::Panel { panel_id } => delete_panel(db, panel_id, mode).await?,
    }

    // Observability only; there is no cross-client broadcast guarantee here.
    tracing::info!(doc_name = %doc, mode = ?mode, "document deleted");
    Ok(())
}

/// Cascade for `note:<id>`: the note doc, every panel doc of the note, and
/// all `panel:<pid>:*` sub-documents.
async fn delete_note(
    db: &PersistenceDb,
    doc: &str,
    note_id: Uuid,
    mode: DeleteMode,
) -> Result<(), Error> {
    let mut txn = db.begin_txn().await?;

    let panel_ids = annotations::panel_ids(&mut txn, note_id)
        .await
        .map_err(persistence_db::Error::Database)?;

    let mut names = vec![doc.to_string()];
    let mut patterns = Vec::with_capacity(panel_ids.len());
    for panel_id in &panel_ids {
        names.push(format!("panel:{panel_id}"));
        patterns.push(format!("panel:{panel_id}:%"));
    }

    match mode {
        DeleteMode::Soft => {
            let marked = annotations::mark_note_deleted(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
            if !marked {
                return Err(Error::NotFound(format!("note '{note_id}' does not exist")));
            }
            updates::sql::delete_for_docs(&mut txn, &names, &patterns)
                .await
                .map_err(persistence_db::Error::Database)?;
            snapshots::sql::delete_for_docs(&mut txn, &names, &patterns)
                .await
                .map_err(persistence_db::Error::Database)?;
            annotations::mark_panels_deleted(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
            annotations::mark_branches_deleted(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
        }
        DeleteMode::Hard => {
            updates::sql::delete_for_docs(&mut txn, &names, &patterns)
                .await
                .map_err(persistence_db::Error::Database)?;
            snapshots::sql::delete_for_docs(&mut txn, &names, &patterns)
                .await
                .map_err(persistence_db::Error::Database)?;
            annotations::delete_branch_rows(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
            annotations::delete_panel_rows(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
            let deleted = annotations::delete_note_row(&mut txn, note_id)
                .await
                .map_err(persistence_db::Error::Database)?;
            if !deleted {
                return Err(Error::NotFound(format!("note '{note_id}' does not exist")));
            }
        }
    }

    txn.commit().await?;
    Ok(())
}

/// Cascade for a bare `panel:<id>` doc: the panel doc and its sub-documents.
///
/// A panel doc can exist without a panel row (legacy data); the marker update
/// is then simply a no-op while the CRDT purge still runs.
async fn delete_panel(db: &PersistenceDb, panel_id: Uuid, mode: DeleteMode) -> Result<(), Error> {
    let mut txn = db.begin_txn().await?;

    let names = vec![format!("panel:{panel_id}")];
    let patterns = vec![format!("panel:{panel_id}:%")];

    updates::sql::delete_for_docs(&mut txn, &names, &patterns)
        .await
        .map_err(persistence_db::Error::Database)?;
    snapshots::sql::delete_for_docs(&mut txn, &names, &patterns)
        .await
        .map_err(persistence_db::Error::Database)?;

    match mode {
        DeleteMode::Soft => {
            annotations::mark_panel_deleted(&mut txn, panel_id)
                .await
                .map_err(persistence_db::Error::Database)?;
        }
        DeleteMode::Hard => {
            annotations::delete_panel_row(&mut txn, panel_id)
                .await
                .map_err(persistence_db::Error::Database)?;
        }
    }

    txn.commit().await?;
    Ok(())
}
