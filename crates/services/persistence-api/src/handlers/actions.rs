//! Unified persistence action handler
//!
//! `POST /persistence` carries `{action, docName, ...}` and dispatches to the
//! same operations as the specialised routes. Kept for clients that predate
//! the split endpoints.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use persistence_db::Checksum;

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::{CompactBody, DeletedBody, LoadBody, SaveSnapshotBody, UpdateBody, UpdateListBody},
        encoding::Base64Bytes,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// The supported actions.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Persist,
    Load,
    GetAllUpdates,
    ClearUpdates,
    SaveSnapshot,
    LoadSnapshot,
    Compact,
}

/// Body of `POST /persistence`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub action: Action,
    pub doc_name: String,
    /// Update blob for `persist` (base64 or legacy integer array).
    pub update: Option<Base64Bytes>,
    /// Snapshot blob for `saveSnapshot`.
    pub snapshot: Option<Base64Bytes>,
    pub client_id: Option<String>,
    /// Optional checksum for `loadSnapshot`.
    pub checksum: Option<String>,
    /// Bypass thresholds for `compact`.
    #[serde(default)]
    pub force: bool,
    /// Opaque panels sidecar for `saveSnapshot`.
    pub panels: Option<serde_json::Value>,
}

/// Acknowledgement of a queued `persist`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistAck {
    pub queued: bool,
}

/// Handler for the `POST /persistence` endpoint
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Json(request): Json<Request>,
) -> Result<Response, ErrorResponse> {
    let doc_name = request.doc_name;
    match request.action {
        Action::Persist => {
            let update = request.update.ok_or(Error::MissingField("update"))?;
            ctx.service
                .persist(
                    &doc_name,
                    Bytes::from(update.into_inner()),
                    request.client_id,
                )
                .await
                .map_err(Error::Service)?;
            Ok(Json(PersistAck { queued: true }).into_response())
        }
        Action::Load => {
            let state = ctx.service.load(&doc_name).await.map_err(Error::Service)?;
            Ok(Json(LoadBody {
                doc_name,
                state: state.map(Base64Bytes),
            })
            .into_response())
        }
        Action::GetAllUpdates => {
            let records = ctx
                .service
                .read_all(&doc_name)
                .await
                .map_err(Error::Service)?;
            let updates: Vec<UpdateBody> = records.into_iter().map(UpdateBody::from).collect();
            Ok(Json(UpdateListBody {
                doc_name,
                count: updates.len(),
                updates,
            })
            .into_response())
        }
        Action::ClearUpdates => {
            let deleted_count = ctx
                .service
                .clear_updates(&doc_name, None)
                .await
                .map_err(Error::Service)?;
            Ok(Json(DeletedBody { deleted_count }).into_response())
        }
        Action::SaveSnapshot => {
            let snapshot = request.snapshot.ok_or(Error::MissingField("snapshot"))?;
            let outcome = ctx
                .service
                .save_snapshot(&doc_name, snapshot.into_inner(), request.panels)
                .await
                .map_err(Error::Service)?;
            Ok(Json(SaveSnapshotBody::from(outcome)).into_response())
        }
        Action::LoadSnapshot => {
            let checksum = request
                .checksum
                .as_deref()
                .map(str::parse::<Checksum>)
                .transpose()
                .map_err(|err| Error::InvalidChecksum(err.to_string()))?;
            let snapshot = ctx
                .service
                .load_snapshot(&doc_name, checksum.as_ref())
                .await
                .map_err(Error::Service)?;
            match snapshot {
                Some(snapshot) => {
                    Ok(Json(super::bodies::SnapshotBody::from(snapshot)).into_response())
                }
                None => Err(Error::SnapshotNotFound { doc_name }.into()),
            }
        }
        Action::Compact => {
            let outcome = ctx
                .service
                .compact(&doc_name, request.force)
                .await
                .map_err(Error::Service)?;
            Ok(Json(CompactBody::from(outcome)).into_response())
        }
    }
}

/// Errors that can occur while dispatching a persistence action
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The action requires a field the request did not carry
    #[error("missing required field '{0}' for this action")]
    MissingField(&'static str),

    /// The checksum is not a valid SHA-256 hex string
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// The doc has no matching snapshot
    #[error("no snapshot found for doc '{doc_name}'")]
    SnapshotNotFound { doc_name: String },

    /// Persistence service error
    #[error(transparent)]
    Service(persistence::Error),
}

impl IntoErrorResponse for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::MissingField(_) => "MISSING_FIELD",
            Error::InvalidChecksum(_) => "INVALID_CHECKSUM",
            Error::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            Error::Service(err) => err.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingField(_) => StatusCode::BAD_REQUEST,
            Error::InvalidChecksum(_) => StatusCode::BAD_REQUEST,
            Error::SnapshotNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Service(err) => err.status_code(),
        }
    }
}
