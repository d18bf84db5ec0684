//! End-to-end chain manager scenarios with a real header store.

use crate::mock_infrastructure::{build_chain, mine_header, EASY_BITS};
use chainview_core::{
    codec::block_hash,
    store::HeaderStore,
    ChainManager,
};
use tempfile::TempDir;

fn store_in(dir: &TempDir, headers_per_file: u32) -> HeaderStore {
    HeaderStore::new(dir.path(), "main", headers_per_file).expect("store dir")
}

#[test]
fn test_checkpoint_then_reload_matches_in_memory_tip() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(20);

    let manager = ChainManager::with_store("main", store_in(&dir, 10));
    for bytes in &chain {
        manager.insert(bytes).unwrap();
    }
    let flushed = manager.checkpoint().unwrap();
    assert_eq!(flushed, 20);
    assert_eq!(manager.persisted_count(), 20);

    let reloaded = ChainManager::with_store("main", store_in(&dir, 10));
    let loaded = reloaded.load().unwrap();
    assert_eq!(loaded, 20);

    let original_tip = manager.get_tip().unwrap();
    let reloaded_tip = reloaded.get_tip().unwrap();
    assert_eq!(reloaded_tip.hash, original_tip.hash);
    assert_eq!(reloaded_tip.height, original_tip.height);
    assert_eq!(reloaded_tip.chain_work, original_tip.chain_work);
}

#[test]
fn test_partial_tail_stays_unpersisted_until_boundary() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(25);

    let manager = ChainManager::with_store("main", store_in(&dir, 10));
    for bytes in &chain {
        manager.insert(bytes).unwrap();
    }

    // 25 headers: two complete files flush, the 5-header tail stays in
    // memory only.
    assert_eq!(manager.checkpoint().unwrap(), 20);
    assert_eq!(manager.persisted_count(), 20);

    let reloaded = ChainManager::with_store("main", store_in(&dir, 10));
    assert_eq!(reloaded.load().unwrap(), 20);
    assert_eq!(reloaded.get_height(), 19);

    // Feeding the tail again (as gossip would) restores the full chain.
    for bytes in &chain[20..] {
        reloaded.insert(bytes).unwrap();
    }
    assert_eq!(reloaded.get_height(), 24);
}

#[test]
fn test_reload_then_extend_and_checkpoint_again() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(30);

    let manager = ChainManager::with_store("main", store_in(&dir, 10));
    for bytes in &chain[..20] {
        manager.insert(bytes).unwrap();
    }
    manager.checkpoint().unwrap();

    let reloaded = ChainManager::with_store("main", store_in(&dir, 10));
    reloaded.load().unwrap();
    for bytes in &chain[20..] {
        reloaded.insert(bytes).unwrap();
    }
    assert_eq!(reloaded.checkpoint().unwrap(), 10);
    assert_eq!(reloaded.persisted_count(), 30);

    let third = ChainManager::with_store("main", store_in(&dir, 10));
    assert_eq!(third.load().unwrap(), 30);
    assert_eq!(third.get_tip().unwrap().hash, reloaded.get_tip().unwrap().hash);
}

#[test]
fn test_reorg_survives_checkpoint_reload() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(9);

    let manager = ChainManager::with_store("main", store_in(&dir, 10));
    for bytes in &chain {
        manager.insert(bytes).unwrap();
    }

    // Reorganize the last header away, then extend past the boundary.
    let fork_base = manager.get_header_by_height(7).unwrap();
    let fork_a = mine_header(&fork_base.hash, 9100, EASY_BITS);
    let fork_b = mine_header(&block_hash(&fork_a), 9101, EASY_BITS);
    manager.insert(&fork_a).unwrap();
    manager.insert(&fork_b).unwrap();
    assert_eq!(manager.get_height(), 9);

    assert_eq!(manager.checkpoint().unwrap(), 10);

    let reloaded = ChainManager::with_store("main", store_in(&dir, 10));
    reloaded.load().unwrap();
    assert_eq!(reloaded.get_height(), 9);
    assert_eq!(
        reloaded.get_header_by_height(8).unwrap().hash,
        block_hash(&fork_a)
    );
    assert_eq!(reloaded.get_tip().unwrap().hash, block_hash(&fork_b));
}

#[tokio::test]
async fn test_boundary_insert_schedules_async_checkpoint() {
    let dir = TempDir::new().unwrap();
    let chain = build_chain(11);

    let manager = ChainManager::with_store("main", store_in(&dir, 10));
    for bytes in &chain {
        manager.insert(bytes).unwrap();
    }

    // The insert at height 10 crossed the boundary and scheduled a
    // background flush; wait for it to land.
    for _ in 0..50 {
        if manager.persisted_count() == 10 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(manager.persisted_count(), 10);

    let reloaded = ChainManager::with_store("main", store_in(&dir, 10));
    assert_eq!(reloaded.load().unwrap(), 10);
}
