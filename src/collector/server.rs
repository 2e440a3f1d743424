use crate::collector::api::{health_check, list_types, send_batch, stream_by_type, CollectorState};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: Arc<CollectorState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/logs/batch", post(send_batch))
        .route("/logs/types", get(list_types))
        .route("/logs/types/:log_type/records", get(stream_by_type))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the collector HTTP server
pub async fn start_server(
    listen_addr: SocketAddr,
    state: Arc<CollectorState>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(listen_addr).await?;
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<CollectorState>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(addr = %listener.local_addr()?, "Starting collector HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Collector HTTP server shutting down gracefully");
        })
        .await
}
