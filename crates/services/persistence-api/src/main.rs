//! `persistd` - the Marginalia persistence daemon.
//!
//! Process edge: wires logging, config, the database pool, the persistence
//! service, signal handling, and the HTTP server together. Owns the shutdown
//! sequence so the core stays free of ambient process state.

use persistence::PersistenceService;
use persistence_api::{BoxError, Config, serve};
use persistence_db::PersistenceDb;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    monitoring::logging::init();

    let config = Config::from_env()?;
    let db = PersistenceDb::connect(&config.database_url, &config.pool).await?;
    let service = PersistenceService::new(db, config.batch.clone(), config.compaction.clone())?;

    let sweep = config.sweep.then(|| service.spawn_sweep());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(watch_signals(shutdown_tx));

    tracing::info!(addr = %config.listen_addr, "persistence API listening");
    serve(config.listen_addr, service.clone(), shutdown_rx).await?;

    // Drain: stop the sweep, flush queued updates, close the pool.
    if let Some(handle) = sweep {
        handle.abort();
    }
    service.shutdown().await?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives, then fires the shutdown channel.
async fn watch_signals(shutdown: broadcast::Sender<()>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    let _ = shutdown.send(());
}
