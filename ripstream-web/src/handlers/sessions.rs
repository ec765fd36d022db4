//! Session creation endpoint.

use axum::extract::{Path, State};
use axum::response::Json;
use ripstream_core::{RegistryError, StatsSnapshot};

use crate::errors::ApiError;
use crate::server::AppState;

/// `POST /{id}/{index}`: ensures a session exists and returns its statistics
/// with the stream view of `index`.
///
/// # Errors
///
/// - `ApiError::Registry` - Path invalid, file missing, or session gone again
pub async fn create_session(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
) -> Result<Json<StatsSnapshot>, ApiError> {
    let opened = state.registry.open_path(&format!("{id}/{index}")).await?;
    let id = opened.session.id().clone();

    let stats = state
        .registry
        .stats(id.clone(), Some(opened.file_index))
        .await?
        .ok_or(RegistryError::SessionDestroyed { id })?;

    Ok(Json(stats))
}
