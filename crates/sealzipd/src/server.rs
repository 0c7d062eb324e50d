//! HTTP server
//!
//! Routes:
//!   POST /v1/encrypt        single file → frame
//!   POST /v1/decrypt        frame → single file
//!   POST /v1/encrypt/batch  files + password CSV → ZIP of frames
//!   GET  /healthz           liveness probe

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sealzip_core::config::SealzipConfig;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{MetadataSink, TracingSink};
use crate::handlers;
use crate::state::AppState;

/// Build the router. Upload sizes are enforced by the ingestor while the
/// body streams, so axum's buffered body limit is switched off.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/encrypt", post(handlers::encrypt_file))
        .route("/v1/decrypt", post(handlers::decrypt_file))
        .route("/v1/encrypt/batch", post(handlers::encrypt_batch))
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Serve on `config.server.listen` until SIGINT or SIGTERM.
pub async fn serve(config: SealzipConfig) -> Result<()> {
    serve_with_sink(config, Arc::new(TracingSink)).await
}

pub async fn serve_with_sink(config: SealzipConfig, sink: Arc<dyn MetadataSink>) -> Result<()> {
    tokio::fs::create_dir_all(&config.server.temp_dir)
        .await
        .map_err(|e| anyhow::anyhow!("creating temp dir {}: {e}", config.server.temp_dir.display()))?;

    let addr = config.server.listen.clone();
    let state = Arc::new(AppState::new(config, sink)?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;

    info!(
        addr = %addr,
        concurrency = state.config.batch.concurrency,
        kdf = state.cipher.profile.name(),
        "sealzipd: listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("http server: {e}"))?;

    info!("sealzipd exiting cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("registering SIGINT handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("registering SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
