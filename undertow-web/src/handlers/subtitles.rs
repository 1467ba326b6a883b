//! Embedded and sidecar subtitle endpoints.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use undertow_core::subtitles::SubtitleTrack;

use super::session_for;
use crate::error::ApiError;
use crate::server::AppState;

const WEBVTT_CONTENT_TYPE: &str = "text/vtt";

/// `GET /subtitles/{id}/{file_index}`
///
/// An empty list means the file has no usable subtitles or could not be
/// probed.
pub async fn list_subtitles(
    State(state): State<AppState>,
    Path((id, file_index)): Path<(String, usize)>,
) -> Result<Json<Vec<SubtitleTrack>>, ApiError> {
    let session = session_for(&state, &id).await?;
    Ok(Json(state.subtitles.list_tracks(&session, file_index).await?))
}

/// `GET /subtitles/{id}/{file_index}/{track}`
///
/// Streams the extracted track as WebVTT while the subprocess produces it.
/// Dropping the body on disconnect kills the subprocess.
pub async fn extract_subtitle(
    State(state): State<AppState>,
    Path((id, file_index, track)): Path<(String, usize, u32)>,
) -> Result<Response, ApiError> {
    let session = session_for(&state, &id).await?;
    let captions = state.subtitles.extract(session, file_index, track).await?;

    Ok((
        [
            (header::CONTENT_TYPE, WEBVTT_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(captions),
    )
        .into_response())
}

/// `GET /sidecar-subtitle/{id}/{file_index}`
pub async fn sidecar_subtitle(
    State(state): State<AppState>,
    Path((id, file_index)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let session = session_for(&state, &id).await?;
    let vtt = state.subtitles.sidecar(&session, file_index).await?;
    Ok(([(header::CONTENT_TYPE, WEBVTT_CONTENT_TYPE)], vtt).into_response())
}
