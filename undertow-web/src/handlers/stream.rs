//! Range-aware file streaming.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use undertow_core::streaming::{ReadMode, RangeError, parse_range_header};

use super::session_for;
use crate::error::ApiError;
use crate::server::AppState;

/// `GET /stream/{id}/{file_index}`
///
/// Serves the whole file with `200` when no `Range` header is sent and the
/// first requested range with `206` otherwise. The first chunk is made
/// available before the response starts, so a stalled swarm is reported as
/// a `500` status; a stall later in the body ends the transfer early.
pub async fn stream_file(
    State(state): State<AppState>,
    Path((id, file_index)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session_for(&state, &id).await?;
    let file = session.file(file_index)?.clone();

    let range_header = match headers.get(header::RANGE) {
        Some(value) => Some(value.to_str().map_err(|_| {
            let error = RangeError::Malformed {
                header: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            };
            ApiError::range(error, file.length)
        })?),
        None => None,
    };
    let requested =
        parse_range_header(range_header, file.length).map_err(|e| ApiError::range(e, file.length))?;

    let bytes = requested.map_or(0..file.length, |range| range.as_exclusive());
    let chunk_size = state.streamer.scheduler().config().chunk_size.max(1) as u64;
    let first_chunk = bytes.start..bytes.end.min(bytes.start.saturating_add(chunk_size));
    state
        .streamer
        .scheduler()
        .ensure_range(&session, file_index, first_chunk)
        .await?;

    tracing::debug!(
        info_hash = %session.info_hash,
        file_index,
        range = ?bytes,
        "Streaming file range"
    );

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, file.content_type())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, bytes.end - bytes.start)
        .header(header::CACHE_CONTROL, "no-cache");
    response = match requested {
        Some(range) => response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range(file.length)),
        None => response.status(StatusCode::OK),
    };

    let body = state
        .streamer
        .stream(Arc::clone(&session), file_index, bytes, ReadMode::Playback);
    response
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::internal("response_error", e.to_string()))
}
