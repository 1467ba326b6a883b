//! Scheduler behaviour under slow, paused and absent peers.

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use undertow_core::config::{SimulationConfig, UndertowConfig};
use undertow_core::swarm::{PieceIndex, PieceState, SwarmEngine};

use crate::harness::{Harness, body_bytes, body_json};

/// Roughly a quarter second per 16 KiB piece.
fn slow_swarm() -> SimulationConfig {
    SimulationConfig {
        download_speed: 64 * 1024,
        peers: 4,
        metadata_delay: Duration::ZERO,
        tick_interval: Duration::from_millis(10),
        seed: Some(7),
    }
}

#[tokio::test]
async fn test_no_peers_stalls_with_server_error() {
    let harness = Harness::with_config(
        SimulationConfig {
            peers: 0,
            ..SimulationConfig::deterministic_testing()
        },
        UndertowConfig::for_testing(),
    )
    .await;
    harness.add().await;

    let started = Instant::now();
    let response = harness
        .get_range(&format!("/stream/{}/0", harness.id()), "bytes=0-99")
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(body_json(response).await["error"], "download_stalled");
}

#[tokio::test]
async fn test_seek_reprioritizes_new_offset() {
    let harness = Harness::with_config(slow_swarm(), UndertowConfig::for_testing()).await;
    harness.add().await;
    let uri = format!("/stream/{}/0", harness.id());
    let info_hash = harness.locator.info_hash;

    let opening = harness.get_range(&uri, "bytes=0-99").await;
    assert_eq!(opening.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(opening).await, harness.video[..100]);

    // Piece 9; the rest of the opening window is still outstanding
    let seek = harness.get_range(&uri, "bytes=150000-150099").await;
    assert_eq!(seek.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(seek).await, harness.video[150_000..150_100]);

    assert_eq!(
        harness.swarm.piece_state(info_hash, PieceIndex::new(9)).unwrap(),
        PieceState::Available
    );
    let skipped = harness.swarm.missing_pieces(info_hash, 1..4).unwrap();
    assert!(
        skipped.contains(&PieceIndex::new(2)),
        "old window finished before the seek target: {skipped:?}"
    );
}

#[tokio::test]
async fn test_read_resumes_after_pause() {
    let harness = Harness::with_config(slow_swarm(), UndertowConfig::for_testing()).await;
    harness.add().await;
    let info_hash = harness.locator.info_hash;
    harness.swarm.set_paused(info_hash, true).unwrap();

    // Straddles the boundary between pieces 0 and 1
    let router = harness.router.clone();
    let uri = format!("/stream/{}/0", harness.id());
    let request = tokio::spawn(async move {
        let request = axum::http::Request::get(uri)
            .header("range", "bytes=16000-17000")
            .body(axum::body::Body::empty())
            .unwrap();
        tower::ServiceExt::oneshot(router, request).await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!request.is_finished());

    harness.swarm.set_paused(info_hash, false).unwrap();
    let response = request.await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await, harness.video[16_000..=17_000]);
}
