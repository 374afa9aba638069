//! Compaction trigger handler

use axum::{Json, extract::State, http::StatusCode};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::CompactBody,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Body of `POST /persistence/compact`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub doc_name: String,
    /// Bypass the compaction thresholds.
    #[serde(default)]
    pub force: bool,
}

/// Handler for the `POST /persistence/compact` endpoint
///
/// Compacts the doc's update log into a snapshot. Without `force` the
/// thresholds decide, and a below-threshold log returns
/// `{skipped: true, updateCount}`.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Json(request): Json<Request>,
) -> Result<Json<CompactBody>, ErrorResponse> {
    let outcome = ctx
        .service
        .compact(&request.doc_name, request.force)
        .await
        .map_err(Error::Service)?;

    Ok(Json(outcome.into()))
}

/// Errors that can occur while compacting
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
