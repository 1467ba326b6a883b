//! Subtitle endpoints, including subprocess cleanup on disconnect.

use axum::http::{StatusCode, header};

use crate::harness::{Harness, body_bytes, body_json};

#[tokio::test]
async fn test_sidecar_srt_is_converted() {
    let harness = Harness::new().await;
    harness.add().await;

    let response = harness
        .get(&format!("/sidecar-subtitle/{}/1", harness.id()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/vtt");
    let vtt = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(
        vtt,
        "WEBVTT\n\n1\r\n00:00:01.500 --> 00:00:03.000\r\nFirst, line\r\n"
    );
}

#[tokio::test]
async fn test_sidecar_of_video_is_unsupported() {
    let harness = Harness::new().await;
    harness.add().await;

    let response = harness
        .get(&format!("/sidecar-subtitle/{}/0", harness.id()))
        .await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_tracks_are_listed() {
    let harness = Harness::new().await;
    harness.add().await;

    let response = harness.get(&format!("/subtitles/{}/0", harness.id())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let tracks = body_json(response).await;
    assert_eq!(tracks.as_array().unwrap().len(), 1);
    assert_eq!(tracks[0]["stream_index"], 2);
    assert_eq!(tracks[0]["text_based"], true);
}

#[cfg(target_os = "linux")]
mod disconnect {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use undertow_core::config::{SimulationConfig, UndertowConfig};

    use crate::harness::Harness;

    /// Writes its pid, then emits cues until killed.
    fn endless_ffmpeg(dir: &Path) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        let script = format!(
            "#!/bin/sh\necho $$ > {}\nprintf 'WEBVTT\\n\\n'\nwhile true; do printf 'NOTE tick\\n\\n'; sleep 0.1; done\n",
            dir.join("pid").display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    async fn active_extractions(client: &reqwest::Client, base: &str) -> u64 {
        let health: serde_json::Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        health["active_extractions"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_client_disconnect_kills_extraction() {
        let scripts = tempfile::tempdir().unwrap();
        let mut config = UndertowConfig::for_testing();
        config.subtitles.ffmpeg_path = endless_ffmpeg(scripts.path());
        let harness =
            Harness::with_config(SimulationConfig::deterministic_testing(), config).await;
        harness.add().await;
        harness.wait_complete().await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let router = harness.router.clone();
        let server = tokio::spawn(async move { axum::serve(listener, router).await });
        let client = reqwest::Client::new();

        let mut response = client
            .get(format!("{base}/subtitles/{}/0/2", harness.id()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let first = response.chunk().await.unwrap().unwrap();
        assert!(first.starts_with(b"WEBVTT"));
        assert_eq!(active_extractions(&client, &base).await, 1);

        let pid: u32 = std::fs::read_to_string(scripts.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!process_gone(pid));

        drop(response);

        let mut waited = Duration::ZERO;
        while !process_gone(pid) && waited < Duration::from_secs(10) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        assert!(process_gone(pid), "extraction {pid} outlived its client");
        assert_eq!(active_extractions(&client, &base).await, 0);

        server.abort();
    }
}
