//! Byte-range delivery: served bytes equal the seeded content.

use axum::http::{StatusCode, header};

use crate::harness::{Harness, VIDEO_LEN, body_bytes};

#[tokio::test]
async fn test_ranges_match_seeded_bytes() {
    let harness = Harness::new().await;
    harness.add().await;
    let uri = format!("/stream/{}/0", harness.id());
    let last = VIDEO_LEN - 1;

    // (header, first byte, last byte)
    let cases = [
        ("bytes=0-99".to_string(), 0, 99),
        ("bytes=16380-16390".to_string(), 16380, 16390),
        ("bytes=100000-".to_string(), 100_000, last),
        ("bytes=-500".to_string(), VIDEO_LEN - 500, last),
        (format!("bytes={last}-{last}"), last, last),
        (format!("bytes=150000-{}", VIDEO_LEN * 2), 150_000, last),
    ];

    for (range, start, end) in cases {
        let response = harness.get_range(&uri, &range).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT, "{range}");
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes {start}-{end}/{VIDEO_LEN}").as_str(),
            "{range}"
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            (end - start + 1).to_string().as_str()
        );
        assert_eq!(body_bytes(response).await, harness.video[start..=end], "{range}");
    }
}

#[tokio::test]
async fn test_full_file_without_range() {
    let harness = Harness::new().await;
    harness.add().await;

    let response = harness.get(&format!("/stream/{}/0", harness.id())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-matroska");
    assert_eq!(body_bytes(response).await, harness.video);
}

#[tokio::test]
async fn test_multi_range_serves_first() {
    let harness = Harness::new().await;
    harness.add().await;

    let response = harness
        .get_range(&format!("/stream/{}/0", harness.id()), "bytes=10-19,40-49")
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await, harness.video[10..20]);
}

#[tokio::test]
async fn test_unsatisfiable_ranges() {
    let harness = Harness::new().await;
    harness.add().await;
    let uri = format!("/stream/{}/0", harness.id());

    for range in [
        format!("bytes={VIDEO_LEN}-"),
        "bytes=500-100".to_string(),
        "bytes=-0".to_string(),
        "items=0-10".to_string(),
    ] {
        let response = harness.get_range(&uri, &range).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{range}");
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes */{VIDEO_LEN}").as_str()
        );
        assert!(body_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn test_unknown_file_and_session() {
    let harness = Harness::new().await;
    harness.add().await;

    let missing_file = harness.get(&format!("/stream/{}/7", harness.id())).await;
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);

    let other = "0123456789abcdef0123456789abcdef01234567";
    let missing_session = harness.get(&format!("/stream/{other}/0")).await;
    assert_eq!(missing_session.status(), StatusCode::NOT_FOUND);

    let malformed = harness.get("/stream/not-a-hash/0").await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}
