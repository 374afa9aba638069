//! Updates clearing handler

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::DeletedBody,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Query parameters of `DELETE /persistence/updates`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub doc_name: String,
    /// Only delete updates strictly older than this timestamp.
    pub before: Option<DateTime<Utc>>,
}

/// Handler for the `DELETE /persistence/updates` endpoint
///
/// Deletes a doc's update records (optionally bounded by `before`) and
/// returns the deleted count. Snapshots are not touched.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Query(params): Query<Params>,
) -> Result<Json<DeletedBody>, ErrorResponse> {
    let deleted_count = ctx
        .service
        .clear_updates(&params.doc_name, params.before)
        .await
        .map_err(Error::Service)?;

    Ok(Json(DeletedBody { deleted_count }))
}

/// Errors that can occur while clearing updates
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
