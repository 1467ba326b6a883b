//! Session lifecycle over HTTP against the simulated swarm.

use axum::http::StatusCode;

use crate::harness::{Harness, body_json};

#[tokio::test]
async fn test_add_status_remove() {
    let harness = Harness::new().await;
    let id = harness.id();

    let added = harness.add().await;
    assert_eq!(added.status(), StatusCode::OK);
    let session = body_json(added).await;
    assert_eq!(session["info_hash"], id.as_str());
    assert_eq!(session["name"], "Feature");
    assert_eq!(session["files"].as_array().unwrap().len(), 2);
    assert_eq!(session["files"][0]["kind"], "video");

    harness.wait_complete().await;
    let status = body_json(harness.get(&format!("/torrent/{id}")).await).await;
    assert_eq!(status["progress"], 1.0);
    assert_eq!(status["pieces_available"], status["piece_count"]);

    assert_eq!(harness.delete().await.status(), StatusCode::OK);
    assert_eq!(harness.delete().await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        harness.get(&format!("/torrent/{id}")).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(harness.swarm.active_count(), 0);
}

#[tokio::test]
async fn test_concurrent_adds_share_one_session() {
    let harness = Harness::new().await;

    let (first, second, third) = tokio::join!(harness.add(), harness.add(), harness.add());
    for response in [first, second, third] {
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["info_hash"], harness.id().as_str());
    }

    let listing = body_json(harness.get("/torrents").await).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(harness.swarm.active_count(), 1);
}

#[tokio::test]
async fn test_bare_info_hash_is_accepted() {
    let harness = Harness::new().await;

    let request = axum::http::Request::post("/torrent")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({ "locator": harness.id() }).to_string(),
        ))
        .unwrap();
    let response = harness.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["info_hash"], harness.id().as_str());
}

#[tokio::test]
async fn test_unknown_content_times_out() {
    let harness = Harness::new().await;
    let unknown = "magnet:?xt=urn:btih:00112233445566778899aabbccddeeff00112233";

    let request = axum::http::Request::post("/torrent")
        .body(axum::body::Body::from(unknown))
        .unwrap();
    let response = harness.send(request).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "swarm_unavailable");
    assert_eq!(harness.swarm.active_count(), 0);
}
