//! Health check handler

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};

use crate::ctx::Ctx;

/// Pool occupancy reported by the health endpoint.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatusBody {
    pub total: u32,
    pub idle: usize,
    /// Acquire waiters are not exposed by the pool; reported as 0.
    pub waiting: usize,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthyBody {
    pub healthy: bool,
    pub latency: u64,
    pub pool_status: PoolStatusBody,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnhealthyBody {
    pub healthy: bool,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Handler for the `GET /health` endpoint
///
/// Probes the database with a trivial query. An unreachable database yields
/// a 503 with the failure message instead of an error response.
pub async fn handler(State(ctx): State<Ctx>) -> axum::response::Response {
    let health = ctx.service.health().await;
    let timestamp = Utc::now();

    if health.healthy {
        let body = HealthyBody {
            healthy: true,
            latency: health.latency.as_millis() as u64,
            pool_status: PoolStatusBody {
                total: health.pool.total,
                idle: health.pool.idle,
                waiting: 0,
            },
            timestamp,
        };
        (StatusCode::OK, Json(body)).into_response()
    } else {
        let body = UnhealthyBody {
            healthy: false,
            error: health
                .error
                .unwrap_or_else(|| "database unreachable".to_string()),
            timestamp,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
