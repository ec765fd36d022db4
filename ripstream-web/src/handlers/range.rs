//! HTTP Range request handling for file streaming
//!
//! Supports a single `bytes=` range per request. Multiple ranges and
//! malformed headers are ignored and the whole file is served instead.

use axum::http::{HeaderMap, header};

/// Outcome of resolving a `Range` header against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range, serve the whole file
    Full,
    /// Inclusive byte span within the file
    Partial { start: u64, end: u64 },
    /// Range starts at or beyond the end of the file
    Unsatisfiable,
}

impl ByteRange {
    /// Number of body bytes this range produces.
    pub fn content_length(&self, total_size: u64) -> u64 {
        match self {
            ByteRange::Full => total_size,
            ByteRange::Partial { start, end } => end - start + 1,
            ByteRange::Unsatisfiable => 0,
        }
    }
}

/// Parse an HTTP Range header against `total_size`.
///
/// Open-ended (`bytes=500-`) and suffix (`bytes=-500`) forms are supported;
/// an end beyond the file is clamped to the last byte.
///
/// # Examples
/// ```
/// use ripstream_web::handlers::range::{ByteRange, parse_range_header};
/// let range = parse_range_header("bytes=100-199", 1000);
/// assert_eq!(range, ByteRange::Partial { start: 100, end: 199 });
/// ```
pub fn parse_range_header(range: &str, total_size: u64) -> ByteRange {
    let Some(spec) = range.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        let Ok(suffix) = end_str.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || total_size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: total_size.saturating_sub(suffix),
            end: total_size - 1,
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end_str.is_empty() {
        None
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Full,
        }
    };

    if start >= total_size {
        return ByteRange::Unsatisfiable;
    }
    let last = total_size - 1;
    ByteRange::Partial {
        start,
        end: end.map_or(last, |end| end.min(last)),
    }
}

/// Raw Range header value, if present and valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::RANGE)
        .and_then(|range| range.to_str().ok())
}

/// Resolves the request's Range header, defaulting to the full file.
pub fn resolve_range(headers: &HeaderMap, total_size: u64) -> ByteRange {
    extract_range_header(headers)
        .map_or(ByteRange::Full, |range| parse_range_header(range, total_size))
}
