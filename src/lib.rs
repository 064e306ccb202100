//! Real-time broadcast relay over WebSocket.
//!
//! Every frame a client sends is fanned out to the other connected
//! clients. The latest chat message is kept and replayed to each newcomer
//! before any other traffic.

pub mod config;
pub mod error;
pub mod message;
pub mod relay;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::AppResult;

/// Serves `app` until Ctrl-C. Peer addresses reach the handlers through
/// `ConnectInfo`.
pub async fn serve(listener: TcpListener, app: Router) -> AppResult<()> {
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    } else {
        // no signal handler: run until the process is killed
        std::future::pending::<()>().await;
    }
}
