//! Session management endpoints.

use axum::Json;
use axum::extract::{Path, State};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use undertow_core::session::{SessionStatus, TorrentSession};

use super::parse_info_hash;
use crate::error::ApiError;
use crate::server::AppState;

/// JSON form of the add request; `magnet` is accepted as an alias.
#[derive(Debug, Default, Deserialize)]
pub struct AddTorrentRequest {
    pub locator: Option<String>,
    pub magnet: Option<String>,
}

/// Extracts the content locator from a JSON object or a plain-text body.
fn locator_from_body(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?.trim();
    let locator = if text.starts_with('{') {
        let request: AddTorrentRequest = serde_json::from_str(text).ok()?;
        request.locator.or(request.magnet)?
    } else {
        text.to_string()
    };
    let locator = locator.trim();
    (!locator.is_empty()).then(|| locator.to_string())
}

/// `POST /torrent`
pub async fn add_torrent(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TorrentSession>, ApiError> {
    let locator = locator_from_body(&body)
        .ok_or_else(|| ApiError::bad_request("request body must carry a content locator"))?;

    let session = state.registry.add(&locator).await?;
    tracing::info!(info_hash = %session.info_hash, name = %session.name, "Session ready");
    Ok(Json(TorrentSession::clone(&session)))
}

/// `GET /torrents`
pub async fn list_torrents(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = state.registry.list().await?;
    Ok(Json(json!({
        "total": sessions.len(),
        "torrents": sessions,
    })))
}

/// `GET /torrent/{id}`
pub async fn torrent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let info_hash = parse_info_hash(&id)?;
    Ok(Json(state.registry.status(info_hash).await?))
}

/// `DELETE /torrent/{id}`
pub async fn remove_torrent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let info_hash = parse_info_hash(&id)?;
    state.registry.remove(info_hash).await?;
    tracing::info!(%info_hash, "Session removed");
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_from_body() {
        let magnet = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";
        assert_eq!(locator_from_body(magnet.as_bytes()).as_deref(), Some(magnet));
        assert_eq!(
            locator_from_body(format!("{{\"locator\": \"{magnet}\"}}").as_bytes()).as_deref(),
            Some(magnet)
        );
        assert_eq!(
            locator_from_body(format!("{{\"magnet\": \" {magnet} \"}}").as_bytes()).as_deref(),
            Some(magnet)
        );

        assert_eq!(locator_from_body(b""), None);
        assert_eq!(locator_from_body(b"  \n"), None);
        assert_eq!(locator_from_body(b"{}"), None);
        assert_eq!(locator_from_body(b"{\"locator\": \"\"}"), None);
        assert_eq!(locator_from_body(b"{not json"), None);
    }
}
