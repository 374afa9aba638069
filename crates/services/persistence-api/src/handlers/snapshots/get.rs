//! Snapshot retrieval handler

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use persistence_db::Checksum;

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::SnapshotBody,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Query parameters of `GET /persistence/snapshots`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub doc_name: String,
    /// Address a specific snapshot instead of the newest one.
    pub checksum: Option<String>,
}

/// Handler for the `GET /persistence/snapshots` endpoint
///
/// Returns the newest snapshot for a doc, or the snapshot with the given
/// checksum. The state blob is base64.
///
/// ## Response
/// - **200 OK**: snapshot metadata and blob
/// - **400 Bad Request**: malformed checksum
/// - **404 Not Found**: the doc has no (matching) snapshot
/// - **500 Internal Server Error**: database error
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Query(params): Query<Params>,
) -> Result<Json<SnapshotBody>, ErrorResponse> {
    let checksum = params
        .checksum
        .as_deref()
        .map(str::parse::<Checksum>)
        .transpose()
        .map_err(|err| Error::InvalidChecksum(err.to_string()))?;

    let snapshot = ctx
        .service
        .load_snapshot(&params.doc_name, checksum.as_ref())
        .await
        .map_err(Error::Service)?;

    match snapshot {
        Some(snapshot) => Ok(Json(snapshot.into())),
        None => Err(Error::NotFound {
            doc_name: params.doc_name,
        }
        .into()),
    }
}

/// Errors that can occur while loading a snapshot
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The checksum query parameter is not a valid SHA-256 hex string
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// The doc has no matching snapshot
    #[error("no snapshot found for doc '{doc_name}'")]
    NotFound { doc_name: String },

    /// Persistence service error
    #[error(transparent)]
    Service(persistence::Error),
}

impl IntoErrorResponse for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidChecksum(_) => "INVALID_CHECKSUM",
            Error::NotFound { .. } => "SNAPSHOT_NOT_FOUND",
            Error::Service(err) => err.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidChecksum(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Service(err) => err.status_code(),
        }
    }
}
