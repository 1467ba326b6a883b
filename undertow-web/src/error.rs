//! Mapping of core errors onto HTTP responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use undertow_core::session::SessionError;
use undertow_core::streaming::{RangeError, StreamingError};
use undertow_core::subtitles::SubtitleError;
use undertow_core::swarm::SwarmError;

/// Error returned by every handler.
///
/// Renders as `{"error": kind, "detail": message}`, except for range
/// failures which carry no body and a `Content-Range: bytes */N` header.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub detail: String,
    content_range: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
            content_range: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", detail)
    }

    /// Rejects a `Range` header against a resource of `total` bytes.
    pub fn range(error: RangeError, total: u64) -> Self {
        Self::range_not_satisfiable(error.to_string(), total)
    }

    fn range_not_satisfiable(detail: String, total: u64) -> Self {
        Self {
            status: StatusCode::RANGE_NOT_SATISFIABLE,
            kind: "range_not_satisfiable",
            detail,
            content_range: Some(RangeError::unsatisfied_content_range(total)),
        }
    }

    pub(crate) fn internal(kind: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, kind, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, kind = self.kind, detail = %self.detail, "Request failed");
        } else {
            tracing::debug!(status = %self.status, kind = self.kind, detail = %self.detail, "Request rejected");
        }

        if let Some(content_range) = self.content_range {
            let mut response = self.status.into_response();
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }

        let body = Json(json!({
            "error": self.kind,
            "detail": self.detail,
        }));
        (self.status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        let detail = error.to_string();
        match error {
            SessionError::InvalidIdentifier { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_identifier", detail)
            }
            SessionError::NotFound { .. } | SessionError::FileNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", detail)
            }
            SessionError::SwarmUnavailable { .. } => Self::internal("swarm_unavailable", detail),
            SessionError::RegistryShutdown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", detail)
            }
            SessionError::Swarm(e) => e.into(),
        }
    }
}

impl From<SwarmError> for ApiError {
    fn from(error: SwarmError) -> Self {
        let detail = error.to_string();
        match error {
            SwarmError::InvalidInfoHash { .. } | SwarmError::InvalidLocator { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_identifier", detail)
            }
            SwarmError::TorrentNotFound { .. } | SwarmError::FileOutOfRange { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", detail)
            }
            _ => Self::internal("swarm_error", detail),
        }
    }
}

impl From<StreamingError> for ApiError {
    fn from(error: StreamingError) -> Self {
        let detail = error.to_string();
        match error {
            StreamingError::FileNotFound { .. } | StreamingError::SessionClosed { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", detail)
            }
            StreamingError::RangeOutOfBounds { length, .. } => {
                Self::range_not_satisfiable(detail, length)
            }
            StreamingError::DownloadStalled { .. } => Self::internal("download_stalled", detail),
            StreamingError::Swarm(e) => e.into(),
            StreamingError::Session { .. } | StreamingError::Io(_) => {
                Self::internal("streaming_error", detail)
            }
        }
    }
}

impl From<SubtitleError> for ApiError {
    fn from(error: SubtitleError) -> Self {
        let detail = error.to_string();
        match error {
            SubtitleError::FileNotFound { .. } | SubtitleError::TrackNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", detail)
            }
            SubtitleError::UnsupportedTrack { .. } | SubtitleError::UnsupportedFormat { .. } => {
                Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_subtitle", detail)
            }
            SubtitleError::Streaming(e) => e.into(),
            SubtitleError::Swarm(e) => e.into(),
            SubtitleError::ProbeFailed { .. }
            | SubtitleError::ExtractionFailed { .. }
            | SubtitleError::Io(_) => Self::internal("subtitle_error", detail),
        }
    }
}


#[cfg(test)]
mod tests {
    use undertow_core::swarm::InfoHash;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let info_hash = InfoHash::new([3; 20]);

        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                SessionError::InvalidIdentifier { reason: "x".into() }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (SessionError::NotFound { info_hash }.into(), StatusCode::NOT_FOUND),
            (
                SessionError::SwarmUnavailable {
                    info_hash,
                    reason: "timeout".into(),
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StreamingError::DownloadStalled {
                    info_hash,
                    missing: 2,
                    waited_secs: 20,
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SubtitleError::TrackNotFound { stream_index: 4 }.into(),
                StatusCode::NOT_FOUND,
            ),
            (
                SubtitleError::UnsupportedTrack {
                    stream_index: 4,
                    codec: "hdmv_pgs_subtitle".into(),
                }
                .into(),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                SubtitleError::Streaming(StreamingError::FileNotFound {
                    info_hash,
                    file_index: 9,
                })
                .into(),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status, expected, "{}", error.detail);
        }
    }

    #[test]
    fn test_range_error_has_no_body() {
        let error = RangeError::Malformed {
            header: "bytes=x-y".to_string(),
        };
        let response = ApiError::range(error, 1000).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }
}
