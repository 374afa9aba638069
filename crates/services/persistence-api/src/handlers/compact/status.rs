//! Compaction status handler

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::CompactStatusBody,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Query parameters of `GET /persistence/compact`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub doc_name: String,
}

/// Handler for the `GET /persistence/compact` endpoint
///
/// Read-only: reports the doc's update-log aggregates, snapshot count, and
/// whether the thresholds recommend compacting now.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Query(params): Query<Params>,
) -> Result<Json<CompactStatusBody>, ErrorResponse> {
    let status = ctx
        .service
        .compact_status(&params.doc_name)
        .await
        .map_err(Error::Service)?;

    Ok(Json(CompactStatusBody::new(params.doc_name, status)))
}

/// Errors that can occur while reading compaction status
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
