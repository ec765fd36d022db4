//! Ranged file streaming over the engine registry.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use ripstream_core::backend::ReadOptions;
use tracing::{debug, info};

use super::range::{ByteRange, resolve_range};
use crate::errors::ApiError;
use crate::lease::{LeasedStream, StreamLease};
use crate::server::AppState;

const DLNA_CONTENT_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// `GET`/`HEAD /{id}/{index}`: streams one file of a session.
///
/// Answers 200 for the whole file or 206 for a single byte range. The
/// registry counts the transfer from before the first byte until the body
/// finishes or the client goes away.
///
/// # Errors
///
/// - `ApiError::Registry` - Path could not be resolved to a file
/// - `ApiError::Backend` - Backend refused the read
pub async fn stream_file(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let opened = state.registry.open_path(&format!("{id}/{index}")).await?;
    let id = opened.session.id().clone();
    let total_size = opened.file.length;
    let range = resolve_range(&headers, total_size);

    if range == ByteRange::Unsatisfiable {
        debug!("Unsatisfiable range for {}/{} of {} bytes", id, index, total_size);
        return Ok(unsatisfiable(total_size));
    }

    let lease = StreamLease::open(&state.registry, id.clone(), opened.file_index).await?;

    let mut response = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "max-age=0, no-cache")
        .header(header::CONTENT_TYPE, content_type(&opened.file.name))
        .header(header::CONTENT_LENGTH, range.content_length(total_size))
        .header("transferMode.dlna.org", "Streaming")
        .header("contentFeatures.dlna.org", DLNA_CONTENT_FEATURES);

    let (start, end) = match range {
        ByteRange::Partial { start, end } => {
            response = response
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total_size}"),
                );
            (start, end)
        }
        _ => {
            response = response.status(StatusCode::OK);
            (0, total_size.saturating_sub(1))
        }
    };

    if method == Method::HEAD {
        drop(lease);
        return Ok(response.body(Body::empty())?);
    }

    let options = ReadOptions {
        start,
        end,
        priority: parse_priority(&headers),
    };
    let chunks = opened.session.backend().read_file(opened.file_index, options)?;

    info!("Streaming {}/{} bytes {}-{}/{}", id, index, start, end, total_size);
    Ok(response.body(Body::from_stream(LeasedStream::new(chunks, lease)))?)
}

fn unsatisfiable(total_size: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [
            (header::CONTENT_RANGE, format!("bytes */{total_size}")),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
    )
        .into_response()
}

fn content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

/// `X-Priority` hint; a present but unparsable value counts as 1.
fn parse_priority(headers: &HeaderMap) -> Option<u32> {
    let value = headers.get("x-priority")?;
    let priority = value
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|priority| *priority > 0)
        .unwrap_or(1);
    Some(priority)
}
