/// HTTP façade over the dispatcher.
///
/// Provides [`router`] (routes + tracing layer) and [`serve`] (bind and run
/// until the shutdown token fires).
pub mod chat;
pub mod routes;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatch::AppContext;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/status/:taskid", get(routes::status))
        .route("/ingest", post(routes::ingest))
        .route("/query", post(routes::query))
        .route("/v1/models", get(chat::models))
        .route("/v1/chat/completions", post(chat::completions))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve on `addr` until `shutdown` is cancelled, then drain the ingest worker.
pub async fn serve(ctx: AppContext, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local: SocketAddr = listener.local_addr()?;
    info!("Listening on http://{local}");

    axum::serve(listener, router(ctx.clone()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    ctx.shutdown().await;
    Ok(())
}
