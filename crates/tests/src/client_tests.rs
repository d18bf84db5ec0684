//! The remote client against a live server: both `ChainTracker`
//! variants must be interchangeable from a caller's point of view.

use crate::mock_infrastructure::{build_chain, mine_header, populated_manager, spawn_api_server, EASY_BITS};
use chainview_core::{client::RemoteClient, codec::block_hash, tracker::ChainTracker};
use std::time::Duration;

#[tokio::test]
async fn test_remote_queries_match_embedded() {
    let manager = populated_manager("test", 8);
    let (base, server) = spawn_api_server(manager.clone()).await;
    let client = RemoteClient::new(&base).unwrap();

    assert_eq!(client.get_height().await, ChainTracker::get_height(manager.as_ref()).await);
    assert_eq!(client.get_network().await.unwrap(), "test");

    let embedded_tip = manager.get_tip().unwrap();
    let remote_tip = client.get_tip().await.unwrap();
    assert_eq!(remote_tip.hash, embedded_tip.hash);
    assert_eq!(remote_tip.chain_work, embedded_tip.chain_work);

    let embedded = manager.get_header_by_height(3).unwrap();
    let by_height = client.get_header_by_height(3).await.unwrap();
    assert_eq!(by_height.hash, embedded.hash);

    let by_hash = client.get_header_by_hash(&embedded.hash).await.unwrap();
    assert_eq!(by_hash.height, 3);

    assert!(client
        .is_valid_root_for_height(&embedded.merkle_root, 3)
        .await
        .unwrap());
    assert!(!client
        .is_valid_root_for_height(&embedded.merkle_root, 4)
        .await
        .unwrap());

    server.abort();
}

#[tokio::test]
async fn test_remote_not_found_maps_cleanly() {
    let (base, server) = spawn_api_server(populated_manager("main", 3)).await;
    let client = RemoteClient::new(&base).unwrap();

    let err = client.get_header_by_height(500).await.unwrap_err();
    assert!(err.is_not_found());

    server.abort();
}

#[tokio::test]
async fn test_remote_headers_parses_binary_span() {
    let manager = populated_manager("main", 10);
    let (base, server) = spawn_api_server(manager.clone()).await;
    let client = RemoteClient::new(&base).unwrap();

    let headers = client.headers(2, 5).await.unwrap();
    assert_eq!(headers.len(), 5);
    for (i, header) in headers.iter().enumerate() {
        let expected = manager.get_header_by_height(2 + u32::try_from(i).unwrap()).unwrap();
        assert_eq!(header.hash, expected.hash);
        assert_eq!(header.height, expected.height);
    }

    server.abort();
}

#[tokio::test]
async fn test_remote_subscription_follows_tips() {
    let manager = populated_manager("main", 2);
    let chain = build_chain(2);
    let (base, server) = spawn_api_server(manager.clone()).await;
    let client = RemoteClient::new(&base).unwrap();

    let mut subscription = client.subscribe();

    // The server sends the current tip as the initial frame.
    let initial = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("initial tip in time")
        .expect("subscription alive");
    assert_eq!(initial.height, 1);

    // A new tip on the server side flows through to the subscriber,
    // and get_tip now answers from the stream cache.
    let next = mine_header(&block_hash(&chain[1]), 21, EASY_BITS);
    manager.insert(&next).unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("tip update in time")
        .expect("subscription alive");
    assert_eq!(update.height, 2);
    assert_eq!(client.get_height().await, 2);

    server.abort();
}

#[tokio::test]
async fn test_remote_unreachable_server_degrades() {
    // Nothing listens here; queries fail, get_tip degrades to None.
    let client = RemoteClient::new("http://127.0.0.1:1").unwrap();
    assert!(client.get_tip().await.is_none());
    assert_eq!(client.get_height().await, 0);
    assert!(client.network().await.is_err());
}
