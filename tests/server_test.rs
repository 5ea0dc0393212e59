mod common;

use std::net::SocketAddr;

use common::*;
use serde_json::json;
use site_cloner::server::{parse_sse_body, router, DONE_SENTINEL};
use site_cloner::ProgressEvent;

async fn serve(h: &Harness) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(h.app.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_clone_over_sse() {
    let h = Harness::new(
        test_config(),
        FakeScraper::page(small_page()),
        FakeGenerator::new(),
        None,
    );
    let addr = serve(&h).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("http://{}/api/clone", addr))
        .json(&json!({ "url": "example.com" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.trim_end().ends_with(&format!("data: {}", DONE_SENTINEL)));
    let events = parse_sse_body(&body);
    assert_eq!(terminal_count(&events), 1);
    let Some(ProgressEvent::Done { clone_id, files, .. }) = events.last() else {
        panic!("expected done, got {:?}", events.last());
    };

    let stored: Vec<site_cloner::GeneratedFile> = client
        .get(format!("http://{}/api/clones/{}/files", addr, clone_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(&stored, files);

    for _ in 0..2 {
        let status = client
            .post(format!("http://{}/api/sandbox/{}/end", addr, clone_id))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);
    }
}

#[tokio::test]
async fn test_invalid_url_returns_400() {
    let h = Harness::new(
        test_config(),
        FakeScraper::page(small_page()),
        FakeGenerator::new(),
        None,
    );
    let addr = serve(&h).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/clone", addr))
        .json(&json!({ "url": "ftp://example.com" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("ftp://example.com"));
}

#[tokio::test]
async fn test_listing_and_missing_record() {
    let h = Harness::new(
        test_config(),
        FakeScraper::page(small_page()),
        FakeGenerator::new(),
        None,
    );
    h.run_clone("https://example.com").await;
    let addr = serve(&h).await;
    let client = reqwest::Client::new();

    let page: serde_json::Value = client
        .get(format!("http://{}/api/clones?page=1&per_page=5", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["url"], "https://example.com");

    let missing = client
        .get(format!("http://{}/api/clones/does-not-exist", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let beacon = client
        .post(format!("http://{}/api/sandbox/does-not-exist/beacon", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(beacon.status(), reqwest::StatusCode::NO_CONTENT);
}
