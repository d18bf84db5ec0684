//! Bootstrap and catch-up against mock CDN and header servers.

use crate::mock_infrastructure::{
    build_chain, populated_manager, spawn_cdn, spawn_header_server, spawn_router,
};
use axum::{routing::get, Router};
use chainview_core::{
    store::HeaderStore,
    sync::{SyncError, Synchronizer},
    types::ManagerState,
    ChainManager,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Publishes a manager's chain as CDN files in `dir`.
fn publish_to_cdn(dir: &TempDir, manager: &Arc<ChainManager>, headers_per_file: u32) {
    let store = HeaderStore::new(dir.path(), "main", headers_per_file).unwrap();
    let publisher = ChainManager::with_store("main", store);
    for height in 0..manager.chain_length() {
        let header = manager.get_header_by_height(height).unwrap();
        publisher.insert(&header.to_bytes()).unwrap();
    }
    publisher.checkpoint().unwrap();
}

#[tokio::test]
async fn test_bootstrap_from_cdn() {
    let source = populated_manager("main", 30);
    let dir = TempDir::new().unwrap();
    publish_to_cdn(&dir, &source, 10);
    let (base, cdn) = spawn_cdn(dir.path().to_path_buf()).await;

    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();
    let inserted = synchronizer.bootstrap(&manager, &base).await.unwrap();

    assert_eq!(inserted, 30);
    assert_eq!(manager.get_height(), 29);
    assert_eq!(manager.get_tip().unwrap().hash, source.get_tip().unwrap().hash);

    cdn.abort();
}

#[tokio::test]
async fn test_bootstrap_skips_covered_files() {
    let source = populated_manager("main", 20);
    let dir = TempDir::new().unwrap();
    publish_to_cdn(&dir, &source, 10);
    let (base, cdn) = spawn_cdn(dir.path().to_path_buf()).await;

    // Local chain already holds the first file's span.
    let manager = ChainManager::new("main");
    for height in 0..10 {
        let header = source.get_header_by_height(height).unwrap();
        manager.insert(&header.to_bytes()).unwrap();
    }

    let synchronizer = Synchronizer::new().unwrap();
    let inserted = synchronizer.bootstrap(&manager, &base).await.unwrap();
    assert_eq!(inserted, 10);
    assert_eq!(manager.get_height(), 19);

    cdn.abort();
}

#[tokio::test]
async fn test_bootstrap_missing_metadata_is_server_error() {
    let dir = TempDir::new().unwrap();
    let (base, cdn) = spawn_cdn(dir.path().to_path_buf()).await;

    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();
    let err = synchronizer.bootstrap(&manager, &base).await.unwrap_err();
    assert!(matches!(err, SyncError::ServerReturnedError(404)));

    cdn.abort();
}

#[tokio::test]
async fn test_bootstrap_rejects_corrupt_file_size() {
    let source = populated_manager("main", 10);
    let dir = TempDir::new().unwrap();
    publish_to_cdn(&dir, &source, 10);
    // Corrupt the file after the metadata was written.
    let path = dir.path().join("mainNet_0.headers");
    let mut data = std::fs::read(&path).unwrap();
    data.truncate(123);
    std::fs::write(&path, &data).unwrap();
    let (base, cdn) = spawn_cdn(dir.path().to_path_buf()).await;

    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();
    let err = synchronizer.bootstrap(&manager, &base).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidFileSize(123)));

    cdn.abort();
}

#[tokio::test]
async fn test_catch_up_extends_local_chain() {
    let source = populated_manager("main", 30);
    let (base, server) = spawn_header_server(source.clone()).await;

    // Local chain holds the first 10 headers of the same history.
    let manager = ChainManager::new("main");
    for height in 0..10 {
        let header = source.get_header_by_height(height).unwrap();
        manager.insert(&header.to_bytes()).unwrap();
    }

    let synchronizer = Synchronizer::new().unwrap();
    let inserted = synchronizer.catch_up(&manager, &base).await.unwrap();
    assert_eq!(inserted, 20);
    assert_eq!(manager.get_height(), 29);
    assert_eq!(manager.get_tip().unwrap().hash, source.get_tip().unwrap().hash);

    server.abort();
}

#[tokio::test]
async fn test_catch_up_noop_when_tip_known() {
    let source = populated_manager("main", 10);
    let (base, server) = spawn_header_server(source.clone()).await;

    let manager = ChainManager::new("main");
    for height in 0..10 {
        let header = source.get_header_by_height(height).unwrap();
        manager.insert(&header.to_bytes()).unwrap();
    }

    let synchronizer = Synchronizer::new().unwrap();
    assert_eq!(synchronizer.catch_up(&manager, &base).await.unwrap(), 0);

    server.abort();
}

#[tokio::test]
async fn test_catch_up_unrelated_chain_fails_common_ancestor() {
    // The server follows a different history than the local chain.
    let source = populated_manager("main", 10);
    let (base, server) = spawn_header_server(source).await;

    let manager = ChainManager::new("main");
    // A disjoint local chain: different genesis seed space.
    let mut prev = chainview_core::codec::BlockHash::ZERO;
    for seed in 9000..9005u32 {
        let bytes = crate::mock_infrastructure::mine_header(
            &prev,
            seed,
            crate::mock_infrastructure::EASY_BITS,
        );
        prev = chainview_core::codec::block_hash(&bytes);
        manager.insert(&bytes).unwrap();
    }

    let synchronizer = Synchronizer::new().unwrap();
    let err = synchronizer.catch_up(&manager, &base).await.unwrap_err();
    assert!(matches!(err, SyncError::CommonAncestorNotFound));

    server.abort();
}

#[tokio::test]
async fn test_catch_up_empty_response_fails_no_headers() {
    // A server that advertises an unknown best header but returns no
    // header data at all.
    let stray = build_chain(1).remove(0);
    let app = Router::new()
        .route(
            "/bestblockheader",
            get(move || {
                let stray = stray.clone();
                async move { stray }
            }),
        )
        .route("/v2/headers", get(|| async { Vec::<u8>::new() }));
    let (addr, server) = spawn_router(app).await;

    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();
    let err = synchronizer
        .catch_up(&manager, &format!("http://{addr}"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoHeadersReturned));

    server.abort();
}

#[tokio::test]
async fn test_catch_up_best_header_failure() {
    let app = Router::new(); // no /bestblockheader route at all
    let (addr, server) = spawn_router(app).await;

    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();
    let err = synchronizer
        .catch_up(&manager, &format!("http://{addr}"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::BestBlockHeaderFailed(404)));

    server.abort();
}

#[tokio::test]
async fn test_run_degrades_gracefully_and_reaches_running() {
    // Both sync sources are unreachable; the node must still come up.
    let manager = ChainManager::new("main");
    let synchronizer = Synchronizer::new().unwrap();

    synchronizer
        .run(
            &manager,
            Some("http://127.0.0.1:1"),
            Some("http://127.0.0.1:1"),
        )
        .await;

    assert_eq!(manager.state(), ManagerState::Running);
    assert_eq!(manager.get_height(), 0);
}

#[tokio::test]
async fn test_run_bootstraps_and_persists() {
    let source = populated_manager("main", 20);
    let cdn_dir = TempDir::new().unwrap();
    publish_to_cdn(&cdn_dir, &source, 10);
    let (base, cdn) = spawn_cdn(cdn_dir.path().to_path_buf()).await;

    let store_dir = TempDir::new().unwrap();
    let store = HeaderStore::new(store_dir.path(), "main", 10).unwrap();
    let manager = ChainManager::with_store("main", store);

    let synchronizer = Synchronizer::new().unwrap();
    synchronizer.run(&manager, Some(&base), None).await;

    assert_eq!(manager.state(), ManagerState::Running);
    assert_eq!(manager.get_height(), 19);
    // run() checkpoints after a successful bulk sync.
    assert_eq!(manager.persisted_count(), 20);
    assert!(store_dir.path().join("mainNetBlockHeaders.json").exists());

    cdn.abort();
}
