//! HTTP server for Ripstream
//!
//! Routes streaming, session and probe requests to the engine registry.
//! The registry and prober are constructed by the caller and injected.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use axum::routing::get;
use ripstream_core::config::ServerConfig;
use ripstream_core::{MediaProber, RegistryHandle};
use thiserror::Error;
use tower_http::cors::{AllowHeaders, Any, CorsLayer};

use crate::handlers::{create_session, probe_media, stream_file};

/// Preflight cache lifetime, in seconds.
const CORS_MAX_AGE: u64 = 1_728_000;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub prober: Arc<dyn MediaProber>,
    pub server: ServerConfig,
}

/// Errors that end the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/probe", get(probe_media))
        .route("/{id}/{index}", get(stream_file).post(create_session))
        .layer(cors_layer())
        .with_state(state)
}

/// Any origin may stream; request headers are mirrored so `Range` passes preflight.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(Duration::from_secs(CORS_MAX_AGE))
}

/// Serves the router until `shutdown` resolves.
///
/// # Errors
///
/// - `ServerError::Bind` - Configured address could not be bound
/// - `ServerError::Serve` - Listener failed while serving
pub async fn run_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let address = format!("{}:{}", state.server.host, state.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;

    tracing::info!("Ripstream server running on http://{}", address);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Ripstream server stopped");
    Ok(())
}
