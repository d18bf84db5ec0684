//! Reusable test helpers: low-difficulty mining and in-process servers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use chainview_core::{
    codec::{block_hash, BlockHash, RawHeader},
    tracker::ChainTracker,
    work::meets_target,
    ChainManager,
};
use server::router::{create_router, AppState};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};

/// A near-trivial difficulty target for mining test headers.
pub const EASY_BITS: u32 = 0x207f_ffff;

/// Mines a header on the given parent until its hash meets `bits`.
pub fn mine_header(prev: &BlockHash, seed: u32, bits: u32) -> Vec<u8> {
    let mut merkle = [0u8; 32];
    merkle[0..4].copy_from_slice(&seed.to_le_bytes());
    merkle[31] = 0x77;

    let mut raw = RawHeader {
        version: 1,
        prev_hash: *prev,
        merkle_root: BlockHash::from_bytes(merkle),
        time: 1_650_000_000_u32.wrapping_add(seed),
        bits,
        nonce: 0,
    };
    loop {
        let bytes = raw.encode();
        if meets_target(&block_hash(&bytes), bits) {
            return bytes.to_vec();
        }
        raw.nonce = raw.nonce.wrapping_add(1);
    }
}

/// Builds a valid chain of `len` headers starting at a genesis.
pub fn build_chain(len: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut prev = BlockHash::ZERO;
    for i in 0..len {
        let bytes = mine_header(&prev, u32::try_from(i).expect("chain length"), EASY_BITS);
        prev = block_hash(&bytes);
        out.push(bytes);
    }
    out
}

/// A manager populated with a fresh `len`-header chain.
pub fn populated_manager(network: &str, len: usize) -> Arc<ChainManager> {
    let manager = ChainManager::new(network);
    for bytes in build_chain(len) {
        manager.insert(&bytes).expect("valid test header");
    }
    manager
}

/// Binds a router on an ephemeral local port.
pub async fn spawn_router(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, handle)
}

/// Spawns the full chainview HTTP surface for a manager.
pub async fn spawn_api_server(manager: Arc<ChainManager>) -> (String, JoinHandle<()>) {
    let app = create_router(AppState { tracker: manager });
    let (addr, handle) = spawn_router(app).await;
    (format!("http://{addr}"), handle)
}

/// Spawns the API surface plus a `/bestblockheader` endpoint, the shape
/// the catch-up synchronizer expects from a remote header server.
pub async fn spawn_header_server(manager: Arc<ChainManager>) -> (String, JoinHandle<()>) {
    let best = Router::new()
        .route("/bestblockheader", get(handle_best_header))
        .with_state(manager.clone());
    let app = best.merge(create_router(AppState { tracker: manager }));
    let (addr, handle) = spawn_router(app).await;
    (format!("http://{addr}"), handle)
}

async fn handle_best_header(State(manager): State<Arc<ChainManager>>) -> impl IntoResponse {
    match ChainTracker::get_tip(manager.as_ref()).await {
        Some(tip) => (StatusCode::OK, tip.to_bytes().to_vec()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Spawns a static file server rooted at `dir`, the shape of a CDN
/// bucket holding header files and their metadata document.
pub async fn spawn_cdn(dir: PathBuf) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/{file}", get(handle_cdn_file))
        .with_state(Arc::new(dir));
    let (addr, handle) = spawn_router(app).await;
    (format!("http://{addr}"), handle)
}

async fn handle_cdn_file(
    State(dir): State<Arc<PathBuf>>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    // Reject path traversal outright; the tests only serve flat names.
    if file.contains('/') || file.contains("..") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match std::fs::read(dir.join(&file)) {
        Ok(data) => (StatusCode::OK, data).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
