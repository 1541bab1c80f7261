//! HTTP API layer.
//!
//! Thin handlers that delegate to the session manager, capture bridge, and
//! transcode pipeline. Provides router construction and server startup.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::backend::MusicBackend;
use crate::session::SessionManager;
use crate::state::Config;

pub mod http;

pub use http::create_router;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the TCP port or serve connections.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Catalog backend handle.
    pub backend: Arc<dyn MusicBackend>,
    /// Single-stream session manager.
    pub session: Arc<SessionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    /// Creates the API state from its services.
    pub fn new(
        backend: Arc<dyn MusicBackend>,
        session: Arc<SessionManager>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            backend,
            session,
            config,
        }
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let port = state.config.read().port;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
