//! Snapshot save handler

use axum::{Json, extract::State, http::StatusCode};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::SaveSnapshotBody,
        encoding::Base64Bytes,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Body of `POST /persistence/snapshots`.
///
/// `snapshot` accepts base64 or a legacy integer array. `panels` is an
/// opaque sidecar stored alongside the blob.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub doc_name: String,
    pub snapshot: Base64Bytes,
    pub panels: Option<serde_json::Value>,
}

/// Handler for the `POST /persistence/snapshots` endpoint
///
/// Stores a full-state snapshot, idempotently by checksum: submitting bytes
/// identical to an existing snapshot writes nothing and returns
/// `{duplicate: true, checksum}`.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Json(request): Json<Request>,
) -> Result<Json<SaveSnapshotBody>, ErrorResponse> {
    let outcome = ctx
        .service
        .save_snapshot(
            &request.doc_name,
            request.snapshot.into_inner(),
            request.panels,
        )
        .await
        .map_err(Error::Service)?;

    Ok(Json(outcome.into()))
}

/// Errors that can occur while saving a snapshot
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Persistence service error
    #[error(transparent)]
    Service(persistence::Error),
}

impl IntoErrorResponse for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::Service(err) => err.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Service(err) => err.status_code(),
        }
    }
}
