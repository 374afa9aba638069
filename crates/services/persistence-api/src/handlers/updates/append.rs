//! Direct update append handler

use axum::{Json, extract::State, http::StatusCode};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::AppendedBody,
        encoding::Base64Bytes,
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Body of `POST /persistence/updates`.
///
/// `update` accepts base64 or a legacy integer array.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub doc_name: String,
    pub update: Base64Bytes,
    pub client_id: Option<String>,
}

/// Handler for the `POST /persistence/updates` endpoint
///
/// Appends one update record directly to the log, bypassing batching, and
/// returns the assigned record id and server timestamp. Clients that do not
/// need the id back should use the `persist` action instead and benefit from
/// coalescing.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Json(request): Json<Request>,
) -> Result<Json<AppendedBody>, ErrorResponse> {
    let size = request.update.as_slice().len();
    let (id, timestamp) = ctx
        .service
        .append_now(
            &request.doc_name,
            request.update.as_slice(),
            request.client_id.as_deref(),
        )
        .await
        .map_err(Error::Service)?;

    Ok(Json(AppendedBody {
        id: *id,
        timestamp,
        size,
    }))
}

/// Errors that can occur while appending an update
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
