//! Marginalia persistence API
//!
//! HTTP surface over the [`persistence::PersistenceService`]. Routes:
//!
//! - `GET    /health`
//! - `POST   /persistence` (unified `{action, ...}` dispatch)
//! - `GET/POST/DELETE /persistence/updates`
//! - `GET/POST/DELETE /persistence/snapshots`
//! - `GET/POST /persistence/compact`
//! - `DELETE /notes/{note_id}`
//!
//! Binary payloads are base64 on the wire; legacy integer arrays are
//! accepted on ingest.

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post},
    serve::ListenerExt as _,
};
use persistence::PersistenceService;
use tokio::{net::TcpListener, sync::broadcast};

pub mod config;
mod ctx;
pub mod handlers;

pub use config::Config;
use ctx::Ctx;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the API router over a service instance.
pub fn router(service: PersistenceService) -> Router {
    Router::new()
        .route("/health", get(handlers::health::handler))
        .route("/persistence", post(handlers::actions::handler))
        .route(
            "/persistence/updates",
            get(handlers::updates::get_all::handler)
                .post(handlers::updates::append::handler)
                .delete(handlers::updates::clear::handler),
        )
        .route(
            "/persistence/snapshots",
            get(handlers::snapshots::get::handler)
                .post(handlers::snapshots::save::handler)
                .delete(handlers::snapshots::prune::handler),
        )
        .route(
            "/persistence/compact",
            get(handlers::compact::status::handler).post(handlers::compact::run::handler),
        )
        .route("/notes/{note_id}", delete(handlers::notes::delete::handler))
        .with_state(Ctx { service })
}

/// Serves the API until the shutdown channel fires.
pub async fn serve(
    at: SocketAddr,
    service: PersistenceService,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), BoxError> {
    serve_at(at, router(service), shutdown).await
}

async fn serve_at(
    addr: SocketAddr,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr)
        .await?
        .tap_io(|tcp_stream| tcp_stream.set_nodelay(true).unwrap());
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
        })
        .await?;
    Ok(())
}
