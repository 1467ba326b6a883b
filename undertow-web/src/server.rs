//! Router construction and server lifecycle.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use undertow_core::config::{ServerConfig, UndertowConfig};
use undertow_core::session::{SessionEvictor, SessionRegistryHandle, spawn_session_registry};
use undertow_core::streaming::{FileStreamer, StreamingScheduler};
use undertow_core::subtitles::{FfprobeInspector, MediaInspector, ProbeCache, SubtitleService};
use undertow_core::swarm::SwarmEngine;

use crate::handlers::{
    add_torrent, extract_subtitle, health, list_subtitles, list_torrents, remove_torrent,
    sidecar_subtitle, stream_file, torrent_status,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistryHandle,
    pub streamer: FileStreamer,
    pub subtitles: Arc<SubtitleService>,
    pub started_at: Instant,
}

impl AppState {
    /// Wires registry, scheduler and subtitle pipeline over `swarm`.
    ///
    /// Probing runs the configured `ffprobe` binary.
    pub fn new(swarm: Arc<dyn SwarmEngine>, config: &UndertowConfig) -> Self {
        let inspector = Arc::new(FfprobeInspector::new(config.subtitles.ffprobe_path.clone()));
        Self::with_inspector(swarm, config, inspector)
    }

    /// Same as [`AppState::new`] with a caller-provided media inspector.
    pub fn with_inspector(
        swarm: Arc<dyn SwarmEngine>,
        config: &UndertowConfig,
        inspector: Arc<dyn MediaInspector>,
    ) -> Self {
        let scheduler = Arc::new(StreamingScheduler::new(
            Arc::clone(&swarm),
            config.streaming.clone(),
        ));
        let streamer = FileStreamer::new(Arc::clone(&scheduler), Arc::clone(&swarm));
        let cache = ProbeCache::new(config.subtitles.cache_ttl);
        let subtitles = Arc::new(SubtitleService::new(
            Arc::clone(&swarm),
            streamer.clone(),
            inspector,
            cache.clone(),
            config.subtitles.clone(),
        ));

        let evictors = vec![
            scheduler as Arc<dyn SessionEvictor>,
            Arc::new(cache) as Arc<dyn SessionEvictor>,
        ];
        let registry = spawn_session_registry(swarm, config.session.clone(), evictors);

        Self {
            registry,
            streamer,
            subtitles,
            started_at: Instant::now(),
        }
    }
}

/// Builds the HTTP router with request tracing and permissive CORS.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/torrent", post(add_torrent))
        .route("/torrents", get(list_torrents))
        .route("/torrent/{id}", get(torrent_status).delete(remove_torrent))
        .route("/stream/{id}/{file_index}", get(stream_file))
        .route("/subtitles/{id}/{file_index}", get(list_subtitles))
        .route("/subtitles/{id}/{file_index}/{track}", get(extract_subtitle))
        .route("/sidecar-subtitle/{id}/{file_index}", get(sidecar_subtitle))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until Ctrl-C, then tears down every session.
///
/// # Errors
/// - Binding the listening address fails
/// - The server loop fails
pub async fn run_server(
    state: AppState,
    config: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %listener.local_addr()?, "Undertow server listening");

    let registry = state.registry.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down sessions");
    if let Err(e) = registry.shutdown().await {
        tracing::warn!(error = %e, "Session registry already stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;
    use undertow_core::subtitles::{SubtitleError, SubtitleTrack};
    use undertow_core::swarm::InfoHash;
    use undertow_core::test_fixtures::{MockSwarm, patterned_bytes};

    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello, world\n";

    struct StaticInspector(Vec<SubtitleTrack>);

    #[async_trait]
    impl MediaInspector for StaticInspector {
        async fn probe(&self, _path: &Path) -> Result<Vec<SubtitleTrack>, SubtitleError> {
            Ok(self.0.clone())
        }
    }

    fn track(stream_index: u32, codec: &str, text_based: bool) -> SubtitleTrack {
        SubtitleTrack {
            stream_index,
            codec: codec.to_string(),
            language: Some("eng".to_string()),
            title: None,
            forced: false,
            default: stream_index == 2,
            text_based,
        }
    }

    struct TestApp {
        router: Router,
        swarm: Arc<MockSwarm>,
        info_hash: InfoHash,
    }

    impl TestApp {
        fn new() -> Self {
            let swarm = Arc::new(MockSwarm::new());
            let info_hash = InfoHash::new([0xab; 20]);
            let video = patterned_bytes(4096);
            swarm.seed(
                info_hash,
                "Show",
                &[
                    ("episode.mkv", video.as_slice()),
                    ("episode.srt", SRT.as_bytes()),
                    ("episode.ass", b"[Script Info]\n".as_slice()),
                ],
                1024,
            );
            let inspector = Arc::new(StaticInspector(vec![
                track(2, "subrip", true),
                track(3, "hdmv_pgs_subtitle", false),
            ]));
            let state = AppState::with_inspector(
                Arc::clone(&swarm) as Arc<dyn SwarmEngine>,
                &UndertowConfig::for_testing(),
                inspector,
            );
            Self {
                router: build_router(state),
                swarm,
                info_hash,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn get_range(&self, uri: &str, range: &str) -> Response {
            let request = Request::get(uri)
                .header(header::RANGE, range)
                .body(Body::empty())
                .unwrap();
            self.send(request).await
        }

        async fn add(&self) -> Response {
            let request = Request::post("/torrent")
                .body(Body::from(self.info_hash.to_string()))
                .unwrap();
            self.send(request).await
        }

        async fn add_complete(&self) {
            assert_eq!(self.add().await.status(), StatusCode::OK);
            self.swarm.complete_all(self.info_hash);
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = TestApp::new();
        let id = app.info_hash.to_string();

        let added = app.add().await;
        assert_eq!(added.status(), StatusCode::OK);
        let session = body_json(added).await;
        assert_eq!(session["info_hash"], id);
        assert_eq!(session["name"], "Show");
        assert_eq!(session["files"][0]["kind"], "video");
        assert_eq!(session["files"][1]["kind"], "subtitle");
        assert_eq!(session["files"][0]["length"], 4096);

        let status = app.get(&format!("/torrent/{id}")).await;
        assert_eq!(status.status(), StatusCode::OK);
        assert_eq!(body_json(status).await["progress"], 0.0);

        let listed = body_json(app.get("/torrents").await).await;
        assert_eq!(listed["total"], 1);

        let delete = || Request::delete(format!("/torrent/{id}")).body(Body::empty()).unwrap();
        let removed = app.send(delete()).await;
        assert_eq!(removed.status(), StatusCode::OK);
        assert_eq!(body_json(removed).await["success"], true);

        assert_eq!(app.send(delete()).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            app.get(&format!("/torrent/{id}")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_add_accepts_json_and_rejects_garbage() {
        let app = TestApp::new();

        let json_body = format!(
            "{{\"magnet\": \"magnet:?xt=urn:btih:{}&dn=Show\"}}",
            app.info_hash
        );
        let request = Request::post("/torrent")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json_body))
            .unwrap();
        assert_eq!(app.send(request).await.status(), StatusCode::OK);

        let empty = Request::post("/torrent").body(Body::empty()).unwrap();
        let response = app.send(empty).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad_request");

        let garbage = Request::post("/torrent")
            .body(Body::from("magnet:?xt=urn:btih:nothex"))
            .unwrap();
        let response = app.send(garbage).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_identifier");

        assert_eq!(
            app.get("/torrent/not-a-hash").await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_stream_full_and_partial() {
        let app = TestApp::new();
        app.add_complete().await;
        let uri = format!("/stream/{}/0", app.info_hash);
        let video = patterned_bytes(4096);

        let full = app.get(&uri).await;
        assert_eq!(full.status(), StatusCode::OK);
        assert_eq!(full.headers()[header::CONTENT_LENGTH], "4096");
        assert_eq!(full.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(full.headers()[header::CONTENT_TYPE], "video/x-matroska");
        assert!(full.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(full).await, video);

        let partial = app.get_range(&uri, "bytes=1000-2047").await;
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(partial.headers()[header::CONTENT_LENGTH], "1048");
        assert_eq!(
            partial.headers()[header::CONTENT_RANGE],
            "bytes 1000-2047/4096"
        );
        assert_eq!(body_bytes(partial).await, video[1000..2048]);

        let suffix = app.get_range(&uri, "bytes=-10").await;
        assert_eq!(suffix.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(suffix).await, video[4086..]);
    }

    #[tokio::test]
    async fn test_stream_rejections() {
        let app = TestApp::new();
        app.add_complete().await;
        let uri = format!("/stream/{}/0", app.info_hash);

        for range in ["bytes=5000-", "bytes=abc", "bytes=20-10", "items=0-1"] {
            let response = app.get_range(&uri, range).await;
            assert_eq!(
                response.status(),
                StatusCode::RANGE_NOT_SATISFIABLE,
                "{range}"
            );
            assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */4096");
            assert!(body_bytes(response).await.is_empty());
        }

        let missing_file = app.get(&format!("/stream/{}/9", app.info_hash)).await;
        assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);

        let unknown = app.get(&format!("/stream/{}/0", "cd".repeat(20))).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_is_server_error() {
        let app = TestApp::new();
        assert_eq!(app.add().await.status(), StatusCode::OK);

        let response = app
            .get_range(&format!("/stream/{}/0", app.info_hash), "bytes=0-99")
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "download_stalled");
    }

    #[tokio::test]
    async fn test_sidecar_conversion() {
        let app = TestApp::new();
        app.add_complete().await;

        let response = app
            .get(&format!("/sidecar-subtitle/{}/1", app.info_hash))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/vtt");
        assert_eq!(
            String::from_utf8(body_bytes(response).await).unwrap(),
            "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nHello, world\n"
        );

        for file_index in [0, 2] {
            let response = app
                .get(&format!("/sidecar-subtitle/{}/{file_index}", app.info_hash))
                .await;
            assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }
    }

    #[tokio::test]
    async fn test_subtitle_tracks() {
        let app = TestApp::new();
        app.add_complete().await;
        let base = format!("/subtitles/{}/0", app.info_hash);

        let tracks = body_json(app.get(&base).await).await;
        assert_eq!(tracks.as_array().unwrap().len(), 2);
        assert_eq!(tracks[0]["stream_index"], 2);
        assert_eq!(tracks[1]["text_based"], false);

        assert_eq!(
            app.get(&format!("{base}/3")).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            app.get(&format!("{base}/7")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            app.get(&format!("/subtitles/{}/5", app.info_hash))
                .await
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_health_counts_sessions() {
        let app = TestApp::new();
        let before = body_json(app.get("/health").await).await;
        assert_eq!(before["status"], "ok");
        assert_eq!(before["active_sessions"], 0);

        app.add_complete().await;
        let after = body_json(app.get("/health").await).await;
        assert_eq!(after["active_sessions"], 1);
        assert_eq!(after["active_extractions"], 0);
    }
}
