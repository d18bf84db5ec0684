//! The `/v2` surface over a real listening server.

use crate::mock_infrastructure::{build_chain, populated_manager, spawn_api_server};
use chainview_core::ChainManager;
use std::time::Duration;

#[tokio::test]
async fn test_height_and_network_endpoints() {
    let (base, server) = spawn_api_server(populated_manager("main", 5)).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/v2/height"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["value"], 4);

    let body: serde_json::Value = reqwest::get(format!("{base}/v2/network"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["value"], "main");

    server.abort();
}

#[tokio::test]
async fn test_header_by_height_past_tip_is_structured_404() {
    let (base, server) = spawn_api_server(populated_manager("main", 5)).await;

    let response = reqwest::get(format!("{base}/v2/header/height/99999999")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["code"].is_string());
    assert!(body["description"].is_string());

    server.abort();
}

#[tokio::test]
async fn test_headers_endpoint_returns_exactly_800_bytes() {
    let (base, server) = spawn_api_server(populated_manager("main", 15)).await;

    let response = reqwest::get(format!("{base}/v2/headers?height=0&count=10")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    let data = response.bytes().await.unwrap();
    assert_eq!(data.len(), 800);

    server.abort();
}

#[tokio::test]
async fn test_headers_endpoint_missing_params_is_400() {
    let (base, server) = spawn_api_server(populated_manager("main", 3)).await;

    let response = reqwest::get(format!("{base}/v2/headers")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "error");

    server.abort();
}

#[tokio::test]
async fn test_sse_stream_delivers_initial_tip_and_updates() {
    let manager = populated_manager("main", 3);
    let chain = build_chain(3);
    let (base, server) = spawn_api_server(manager.clone()).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/v2/tip/stream"))
        .header("accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = Box::pin(response.bytes_stream());
    let initial = read_data_frame(&mut body).await;
    assert_eq!(initial["height"], 2);

    // Extend the chain; the stream must carry the new tip.
    let next = crate::mock_infrastructure::mine_header(
        &chainview_core::codec::block_hash(&chain[2]),
        300,
        crate::mock_infrastructure::EASY_BITS,
    );
    manager.insert(&next).unwrap();

    let update = read_data_frame(&mut body).await;
    assert_eq!(update["height"], 3);

    server.abort();
}

#[tokio::test]
async fn test_tip_404_on_empty_chain() {
    let (base, server) = spawn_api_server(ChainManager::new("main")).await;

    let response = reqwest::get(format!("{base}/v2/tip")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.abort();
}

/// Reads frames from an SSE byte stream until a `data:` line arrives.
async fn read_data_frame(
    body: &mut (impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
) -> serde_json::Value {
    use futures::StreamExt;

    let mut buffer = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let chunk = tokio::time::timeout_at(deadline, body.next())
            .await
            .expect("timed out waiting for SSE frame")
            .expect("stream ended")
            .expect("stream error");
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    return serde_json::from_str(data).expect("valid tip JSON");
                }
            }
        }
    }
}
