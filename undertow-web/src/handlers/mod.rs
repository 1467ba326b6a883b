//! HTTP request handlers organized by functionality

pub mod health;
pub mod stream;
pub mod subtitles;
pub mod torrents;

use axum::http::StatusCode;
pub use health::{HealthReport, health};
pub use stream::stream_file;
pub use subtitles::{extract_subtitle, list_subtitles, sidecar_subtitle};
pub use torrents::{AddTorrentRequest, add_torrent, list_torrents, remove_torrent, torrent_status};
use undertow_core::session::SessionRef;
use undertow_core::swarm::InfoHash;

use crate::error::ApiError;
use crate::server::AppState;

/// Parses a path identifier; only 40 character hex hashes are accepted.
pub(crate) fn parse_info_hash(id: &str) -> Result<InfoHash, ApiError> {
    InfoHash::from_hex(id).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_identifier",
            format!("'{id}' is not a 40 character hex info hash"),
        )
    })
}

pub(crate) async fn session_for(state: &AppState, id: &str) -> Result<SessionRef, ApiError> {
    let info_hash = parse_info_hash(id)?;
    Ok(state.registry.get(info_hash).await?)
}
