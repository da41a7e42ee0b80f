//! HTTP bridge implementation using Axum.

use crate::handler::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use channel_proxy::ServerChannel;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Server channels reachable through the bridge, by name
    pub channels: HashMap<String, Arc<dyn ServerChannel>>,
}

/// Build the bridge router.
pub fn router(channels: HashMap<String, Arc<dyn ServerChannel>>) -> Router {
    let state = Arc::new(AppState { channels });

    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .with_state(state)
}

/// Start the JSON-RPC HTTP bridge.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    channels: HashMap<String, Arc<dyn ServerChannel>>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(channels);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP bridge listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP bridge error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;

    #[tokio::test]
    async fn test_server_starts() {
        let services = Services::new();
        let addr = start_server(services.channels(), "127.0.0.1", 0)
            .await
            .unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_server_rejects_bad_host() {
        let services = Services::new();
        assert!(start_server(services.channels(), "nowhere:", 0).await.is_err());
    }
}
