//! Snapshot pruning handler

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::PrunedBody,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Default number of snapshots to keep when `keepLast` is not given.
const DEFAULT_KEEP_LAST: i64 = 3;

/// Query parameters of `DELETE /persistence/snapshots`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub doc_name: String,
    /// How many of the newest snapshots to retain.
    pub keep_last: Option<i64>,
}

/// Handler for the `DELETE /persistence/snapshots` endpoint
///
/// Deletes all but the newest `keepLast` snapshots for a doc and returns the
/// pruned count.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Query(params): Query<Params>,
) -> Result<Json<PrunedBody>, ErrorResponse> {
    let keep = params.keep_last.unwrap_or(DEFAULT_KEEP_LAST);
    if keep < 0 {
        return Err(Error::InvalidKeepLast(keep).into());
    }

    let pruned_count = ctx
        .service
        .prune_snapshots(&params.doc_name, keep)
        .await
        .map_err(Error::Service)?;

    Ok(Json(PrunedBody { pruned_count }))
}

/// Errors that can occur while pruning snapshots
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `keepLast` must be non-negative
    #[error("keepLast must be non-negative, got {0}")]
    InvalidKeepLast(i64),

    /// Persistence service error
    #[error(transparent)]
    Service(persistence::Error),
}

impl IntoErrorResponse for Error {
    fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidKeepLast(_) => "INVALID_KEEP_LAST",
            Error::Service(err) => err.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidKeepLast(_) => StatusCode::BAD_REQUEST,
            Error::Service(err) => err.status_code(),
        }
    }
}
