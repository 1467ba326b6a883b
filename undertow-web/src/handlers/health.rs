//! Process health endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::server::AppState;

/// Process-wide counters.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub active_sessions: usize,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub active_extractions: usize,
    pub uptime_secs: u64,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    let sessions = state.registry.list().await?;

    Ok(Json(HealthReport {
        status: "ok",
        active_sessions: sessions.len(),
        download_rate: sessions.iter().map(|s| s.download_rate).sum(),
        upload_rate: sessions.iter().map(|s| s.upload_rate).sum(),
        active_extractions: state.subtitles.active_extractions(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}
