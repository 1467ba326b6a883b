//! Shared setup: a router over a simulated swarm seeded with one feature.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use undertow_core::config::{SimulationConfig, UndertowConfig};
use undertow_core::subtitles::{MediaInspector, SubtitleError, SubtitleTrack};
use undertow_core::swarm::{ContentLocator, SwarmEngine};
use undertow_core::test_fixtures::patterned_bytes;
use undertow_sim::{ContentCreator, SimulatedSwarm};
use undertow_web::{AppState, build_router};

pub const PIECE: u32 = 16 * 1024;
pub const VIDEO_LEN: usize = 200 * 1024;
pub const SRT: &str = "1\r\n00:00:01,500 --> 00:00:03,000\r\nFirst, line\r\n";

/// Inspector reporting a fixed track list.
pub struct StaticInspector(pub Vec<SubtitleTrack>);

#[async_trait]
impl MediaInspector for StaticInspector {
    async fn probe(&self, _path: &Path) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        Ok(self.0.clone())
    }
}

pub fn text_track(stream_index: u32) -> SubtitleTrack {
    SubtitleTrack {
        stream_index,
        codec: "subrip".to_string(),
        language: Some("eng".to_string()),
        title: None,
        forced: false,
        default: true,
        text_based: true,
    }
}

pub struct Harness {
    pub router: Router,
    pub state: AppState,
    pub swarm: SimulatedSwarm,
    pub locator: ContentLocator,
    pub video: Vec<u8>,
    _downloads: TempDir,
}

impl Harness {
    /// Deterministic fast swarm with test timeouts.
    pub async fn new() -> Self {
        Self::with_config(
            SimulationConfig::deterministic_testing(),
            UndertowConfig::for_testing(),
        )
        .await
    }

    pub async fn with_config(simulation: SimulationConfig, config: UndertowConfig) -> Self {
        let downloads = tempfile::tempdir().unwrap();
        let swarm = SimulatedSwarm::new(simulation, downloads.path());
        let video = patterned_bytes(VIDEO_LEN);
        let content = ContentCreator::with_piece_size(PIECE)
            .from_memory(
                "Feature",
                vec![
                    ("feature.mkv".to_string(), Bytes::from(video.clone())),
                    ("feature.srt".to_string(), Bytes::from_static(SRT.as_bytes())),
                ],
            )
            .await
            .unwrap();
        let locator = swarm.seed(content);

        let inspector = Arc::new(StaticInspector(vec![text_track(2)]));
        let engine: Arc<dyn SwarmEngine> = Arc::new(swarm.clone());
        let state = AppState::with_inspector(engine, &config, inspector);

        Self {
            router: build_router(state.clone()),
            state,
            swarm,
            locator,
            video,
            _downloads: downloads,
        }
    }

    pub fn id(&self) -> String {
        self.locator.info_hash.to_string()
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_range(&self, uri: &str, range: &str) -> Response {
        let request = Request::get(uri)
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Adds the seeded feature through `POST /torrent`.
    pub async fn add(&self) -> Response {
        let request = Request::post("/torrent")
            .body(Body::from(self.locator.to_magnet()))
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self) -> Response {
        let request = Request::delete(format!("/torrent/{}", self.id()))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Polls the simulated swarm until every piece has arrived.
    pub async fn wait_complete(&self) {
        for _ in 0..500 {
            let stats = self.swarm.stats(self.locator.info_hash).unwrap();
            if stats.progress() >= 1.0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("simulated download did not complete");
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
