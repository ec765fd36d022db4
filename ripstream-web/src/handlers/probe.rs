//! Media probing endpoint.

use axum::extract::{Query, State};
use axum::response::Json;
use ripstream_core::ProbeError;
use ripstream_core::config::ServerConfig;
use serde::Deserialize;

use crate::errors::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub url: Option<String>,
}

/// `GET /probe?url=`: returns the prober's metadata JSON.
///
/// # Errors
///
/// - `ApiError::Probe` - Missing URL, prober failure or timeout
pub async fn probe_media(
    State(state): State<AppState>,
    Query(query): Query<ProbeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(url) = query.url.filter(|url| !url.trim().is_empty()) else {
        return Err(ProbeError::InvalidUrl { url: String::new() }.into());
    };

    let url = absolute_url(&url, &state.server);
    let metadata = state.prober.probe(&url).await?;
    Ok(Json(metadata))
}

/// Resolves a URL without a scheme against this server.
pub fn absolute_url(url: &str, server: &ServerConfig) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}:{}{}", server.host, server.port, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_urls_point_at_this_server() {
        let server = ServerConfig::default();
        assert_eq!(
            absolute_url("/abc/0", &server),
            "http://127.0.0.1:3000/abc/0"
        );
        assert_eq!(
            absolute_url("https://cdn.example/a.mp4", &server),
            "https://cdn.example/a.mp4"
        );
    }
}
