//! Note delete handler

use axum::{
    extract::{Path, Query, State, rejection::PathRejection},
    http::{HeaderMap, StatusCode},
};
use persistence::DeleteMode;
use uuid::Uuid;

use crate::{
    ctx::Ctx,
    handlers::error::{ErrorResponse, IntoErrorResponse},
};

/// Header a caller must send to confirm a hard delete.
const CONFIRM_DELETE_HEADER: &str = "x-confirm-delete";

/// Query parameters of `DELETE /notes/{note_id}`.
#[derive(Debug, serde::Deserialize)]
pub struct Params {
    /// `true` removes the note/panel/branch rows as well. Requires the
    /// `X-Confirm-Delete: PERMANENTLY-DELETE` header.
    #[serde(default)]
    pub hard: bool,
}

/// Handler for the `DELETE /notes/{note_id}` endpoint
///
/// Soft delete (the default) purges the note's update log and snapshots -
/// including every panel doc of the note - and sets `deleted_at` markers on
/// the note, panel, and branch rows. Hard delete additionally removes those
/// rows and must carry the confirmation header.
///
/// ## Response
/// - **204 No Content**: deletion committed
/// - **400 Bad Request**: invalid note id
/// - **403 Forbidden**: hard delete without the confirmation header
/// - **404 Not Found**: no such note
/// - **500 Internal Server Error**: database error (transaction rolled back)
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    path: Result<Path<Uuid>, PathRejection>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Result<StatusCode, ErrorResponse> {
    let note_id = match path {
        Ok(Path(note_id)) => note_id,
        Err(err) => {
            tracing::debug!(error = ?err, "invalid note ID in path");
            return Err(Error::InvalidId { err }.into());
        }
    };

    let mode = if params.hard {
        DeleteMode::Hard
    } else {
        DeleteMode::Soft
    };
    let confirmation = headers
        .get(CONFIRM_DELETE_HEADER)
        .and_then(|value| value.to_str().ok());

    ctx.service
        .delete_doc(&format!("note:{note_id}"), mode, confirmation)
        .await
        .map_err(Error::Service)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Errors that can occur while deleting a note
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The note ID in the URL path is invalid
    #[error("invalid note ID: {err}")]
    InvalidId {
        /// The rejection details from Axum's path extractor
        err: PathRejection,
    },

    /// Persistence service error
    #[error(transparent)]
    Service(persistence::Error),
}

impl IntoErrorResponse for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidId { .. } => "INVALID_NOTE_ID",
            Error::Service(err) => err.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidId { .. } => StatusCode::BAD_REQUEST,
            Error::Service(err) => err.status_code(),
        }
    }
}
