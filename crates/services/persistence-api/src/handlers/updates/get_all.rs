//! Updates listing handler

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};

use crate::{
    ctx::Ctx,
    handlers::{
        bodies::{UpdateBody, UpdateListBody},
        error::{ErrorResponse, IntoErrorResponse},
    },
};

/// Query parameters of `GET /persistence/updates`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub doc_name: String,
    /// Only return updates at or after this timestamp.
    pub since: Option<DateTime<Utc>>,
}

/// Handler for the `GET /persistence/updates` endpoint
///
/// Returns a doc's raw update records in `(timestamp, id)` ascending order,
/// flushing the batcher first so every acknowledged persist is included.
/// Payloads are base64.
#[tracing::instrument(skip_all, err)]
pub async fn handler(
    State(ctx): State<Ctx>,
    Query(params): Query<Params>,
) -> Result<Json<UpdateListBody>, ErrorResponse> {
    let records = ctx
        .service
        .read_all(&params.doc_name)
        .await
        .map_err(Error::Service)?;
    let records: Vec<_> = match params.since {
        Some(since) => records
            .into_iter()
            .filter(|r| r.timestamp >= since)
            .collect(),
        None => records,
    };

    let updates: Vec<UpdateBody> = records.into_iter().map(UpdateBody::from).collect();
    Ok(Json(UpdateListBody {
        doc_name: params.doc_name,
        count: updates.len(),
        updates,
    }))
}

/// Errors that can occur while listing updates
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
