//! The chain manager: insertion, validation, reorg handling, queries.
//!
//! # Insertion
//!
//! `insert` decodes the 80-byte payload, rejects duplicates, parks
//! parentless headers for later adoption, verifies proof of work against
//! the header's own compact target, and computes the derived height and
//! cumulative chain work from the parent. A header whose chain work
//! strictly exceeds the current tip's triggers a reorganization: the new
//! branch and the main chain are walked backward in lockstep to their
//! common ancestor and `by_height` is rewritten from there. Equal work
//! keeps the currently-held tip (first seen wins).
//!
//! Reorganizations past the prune horizon are impossible by
//! construction: a branch whose fork point is buried deeper than
//! [`PRUNE_HORIZON`] below the tip is rejected as a broken chain.
//!
//! # Persistence
//!
//! Per-header ingestion never writes to disk. Complete file-sized spans
//! of the main chain are flushed by `checkpoint`, triggered at
//! `tip.height % headers_per_file == 0` boundaries or explicitly after a
//! bulk sync.

use crate::{
    broadcast::{TipBroadcaster, TipSubscription},
    chain::index::ChainIndex,
    codec::{self, BlockHash, RawHeader, HEADER_SIZE},
    errors::ChainError,
    store::{HeaderStore, StoreError},
    types::{BlockHeader, InsertOutcome, ManagerState, UNKNOWN_HEIGHT},
    work::{self, ChainWork},
};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Weak,
};
use tracing::{debug, info, warn};

/// Depth below the tip past which orphans are deleted and
/// reorganizations are forbidden.
pub const PRUNE_HORIZON: u32 = 100;

/// In-memory index of all known block headers for one network.
///
/// The write path is serialized by a single exclusive lock; queries
/// take a shared lock and copy out `Arc`s. Header values are never
/// mutated after insertion.
pub struct ChainManager {
    network: String,
    index: RwLock<ChainIndex>,
    state: ArcSwap<ManagerState>,
    broadcaster: TipBroadcaster,
    store: Option<HeaderStore>,
    /// Count of main-chain headers already flushed to the store,
    /// always a multiple of the file size.
    persisted: AtomicU32,
    ingress_started: AtomicBool,
    /// Self-handle for scheduling background checkpoint tasks.
    weak_self: Weak<ChainManager>,
}

impl ChainManager {
    /// Creates a manager with no backing store (nothing is persisted).
    #[must_use]
    pub fn new(network: impl Into<String>) -> Arc<Self> {
        Self::build(network.into(), None)
    }

    /// Creates a manager backed by a header store.
    #[must_use]
    pub fn with_store(network: impl Into<String>, store: HeaderStore) -> Arc<Self> {
        Self::build(network.into(), Some(store))
    }

    fn build(network: String, store: Option<HeaderStore>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            network,
            index: RwLock::new(ChainIndex::new()),
            state: ArcSwap::from_pointee(ManagerState::Loading),
            broadcaster: TipBroadcaster::new(),
            store,
            persisted: AtomicU32::new(0),
            ingress_started: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    /// The configured network identifier.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        **self.state.load()
    }

    /// Advances the lifecycle state. Transitions are monotonic; an
    /// attempt to move backward is ignored and reported as `false`.
    pub fn advance_state(&self, next: ManagerState) -> bool {
        let current = **self.state.load();
        if next > current {
            self.state.store(Arc::new(next));
            info!(network = %self.network, state = ?next, "chain manager state advanced");
            true
        } else {
            false
        }
    }

    /// Registers a tip event subscriber.
    #[must_use]
    pub fn subscribe(&self) -> TipSubscription {
        self.broadcaster.subscribe()
    }

    #[must_use]
    pub fn broadcaster(&self) -> &TipBroadcaster {
        &self.broadcaster
    }

    /// Marks the gossip ingress as started. Returns `false` when it
    /// already was, which callers must treat as a programming error.
    pub(crate) fn mark_ingress_started(&self) -> bool {
        !self.ingress_started.swap(true, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Queries (shared lock, no disk access)
    // ------------------------------------------------------------------

    /// The current chain tip, or `None` before the first insertion.
    #[must_use]
    pub fn get_tip(&self) -> Option<Arc<BlockHeader>> {
        self.index.read().tip_header().cloned()
    }

    /// The current tip height, 0 when the index is empty.
    #[must_use]
    pub fn get_height(&self) -> u32 {
        self.index.read().tip_header().map_or(0, |tip| tip.height)
    }

    /// Equals [`get_height`](Self::get_height).
    #[must_use]
    pub fn current_height(&self) -> u32 {
        self.get_height()
    }

    /// Number of main-chain headers (tip height + 1, or 0 when empty).
    #[must_use]
    pub fn chain_length(&self) -> u32 {
        self.index.read().chain_length()
    }

    /// The main-chain header at a height.
    ///
    /// # Errors
    ///
    /// [`ChainError::HeaderNotFound`] past the tip, or if the indexed
    /// hash has no owning header (an invariant breach, logged).
    pub fn get_header_by_height(&self, height: u32) -> Result<Arc<BlockHeader>, ChainError> {
        let index = self.index.read();
        match index.main_hash_at(height) {
            None => Err(ChainError::HeaderNotFound),
            Some(hash) => match index.get(hash) {
                Some(header) => Ok(header.clone()),
                None => {
                    warn!(height, %hash, "main-chain hash missing from index");
                    Err(ChainError::HeaderNotFound)
                }
            },
        }
    }

    /// Any indexed header by hash, including orphans: headers off the
    /// main chain and parentless headers still at [`UNKNOWN_HEIGHT`].
    ///
    /// # Errors
    ///
    /// [`ChainError::HeaderNotFound`] when the hash is unknown.
    pub fn get_header_by_hash(&self, hash: &BlockHash) -> Result<Arc<BlockHeader>, ChainError> {
        self.index
            .read()
            .get(hash)
            .cloned()
            .ok_or(ChainError::HeaderNotFound)
    }

    /// Main-chain headers from `start`, stopping at the first miss.
    #[must_use]
    pub fn get_headers(&self, start: u32, count: u32) -> Vec<Arc<BlockHeader>> {
        self.index.read().headers_from(start, count)
    }

    /// True iff the main-chain header at `height` carries this merkle
    /// root.
    ///
    /// # Errors
    ///
    /// Propagates [`ChainError::HeaderNotFound`].
    pub fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, ChainError> {
        let header = self.get_header_by_height(height)?;
        Ok(header.merkle_root == *root)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Inserts one raw 80-byte header.
    ///
    /// Tip events are published after the index mutation is visible to
    /// readers. May schedule an asynchronous store checkpoint when the
    /// tip crosses a file boundary.
    ///
    /// # Errors
    ///
    /// - [`ChainError::InvalidHeaderSize`] for payloads that are not 80 bytes
    /// - [`ChainError::DuplicateHeader`] when the hash is already known
    /// - [`ChainError::InsufficientPow`] when the hash misses its target
    /// - [`ChainError::BrokenChain`] when a heavier branch forks below
    ///   the prune horizon
    /// - [`ChainError::IntegerOverflow`] when the height would wrap
    pub fn insert(&self, bytes: &[u8]) -> Result<InsertOutcome, ChainError> {
        let outcome = self.insert_bytes(bytes)?;
        if matches!(outcome, InsertOutcome::Connected { .. }) {
            self.maybe_checkpoint();
        }
        Ok(outcome)
    }

    /// Insertion without checkpoint scheduling; used by `insert` and by
    /// the store loader.
    fn insert_bytes(&self, bytes: &[u8]) -> Result<InsertOutcome, ChainError> {
        let raw = codec::decode_header(bytes)?;
        let hash = codec::block_hash(bytes);

        let mut tip_events = Vec::new();
        let outcome = {
            let mut index = self.index.write();
            self.insert_locked(&mut index, raw, hash, &mut tip_events)
        };

        // Published only after the write lock is released, so any reader
        // that takes the lock observes the tip the event describes.
        for tip in tip_events {
            self.broadcaster.publish(tip);
        }

        outcome
    }

    fn insert_locked(
        &self,
        index: &mut ChainIndex,
        raw: RawHeader,
        hash: BlockHash,
        tip_events: &mut Vec<Arc<BlockHeader>>,
    ) -> Result<InsertOutcome, ChainError> {
        if index.contains(&hash) {
            return Err(ChainError::DuplicateHeader);
        }

        // A parked header is not a usable parent; its own height is
        // still unknown, so children queue up behind it.
        let mut reorged = if raw.prev_hash.is_zero() && index.is_empty() {
            self.connect(index, raw, hash, 0, ChainWork::from_bits(raw.bits), tip_events)?
        } else if let Some(parent) = index.get_connected(&raw.prev_hash).cloned() {
            if !work::meets_target(&hash, raw.bits) {
                return Err(ChainError::InsufficientPow);
            }
            let height = parent.height.checked_add(1).ok_or(ChainError::IntegerOverflow)?;
            let chain_work = &parent.chain_work + &ChainWork::from_bits(raw.bits);
            self.connect(index, raw, hash, height, chain_work, tip_events)?
        } else {
            let orphan =
                Arc::new(BlockHeader::new(raw, hash, UNKNOWN_HEIGHT, ChainWork::zero()));
            index.park_orphan(orphan);
            debug!(%hash, prev = %raw.prev_hash, "parentless header indexed as orphan");
            return Ok(InsertOutcome::Orphaned);
        };

        // Opportunistic adoption: connect any parked orphans now
        // reachable from the one just inserted, recursively.
        let mut worklist = vec![hash];
        while let Some(parent_hash) = worklist.pop() {
            for orphan in index.take_pending_children(&parent_hash) {
                match self.adopt(index, &orphan, tip_events) {
                    Ok(child_reorged) => {
                        reorged |= child_reorged;
                        worklist.push(orphan.hash);
                    }
                    Err(err) => {
                        debug!(error = %err, parent = %parent_hash, "parked orphan dropped");
                    }
                }
            }
        }

        Ok(InsertOutcome::Connected { reorged })
    }

    /// Connects one parked orphan to its now-present parent, replacing
    /// the unknown-height placeholder with the fully derived header.
    /// A failing orphan is evicted from the index.
    fn adopt(
        &self,
        index: &mut ChainIndex,
        orphan: &Arc<BlockHeader>,
        tip_events: &mut Vec<Arc<BlockHeader>>,
    ) -> Result<bool, ChainError> {
        let raw = orphan.raw();
        let hash = orphan.hash;

        let result = (|| {
            if !work::meets_target(&hash, raw.bits) {
                return Err(ChainError::InsufficientPow);
            }
            let parent = index
                .get_connected(&raw.prev_hash)
                .cloned()
                .ok_or(ChainError::HeaderNotFound)?;
            let height = parent.height.checked_add(1).ok_or(ChainError::IntegerOverflow)?;
            let chain_work = &parent.chain_work + &ChainWork::from_bits(raw.bits);
            self.connect(index, raw, hash, height, chain_work, tip_events)
        })();

        if result.is_err() {
            index.remove(&hash);
        }
        result
    }

    /// Inserts a connected header and performs the reorg decision.
    /// Returns `true` iff the header displaced existing main-chain
    /// entries (a plain tip extension reports `false`).
    fn connect(
        &self,
        index: &mut ChainIndex,
        raw: RawHeader,
        hash: BlockHash,
        height: u32,
        chain_work: ChainWork,
        tip_events: &mut Vec<Arc<BlockHeader>>,
    ) -> Result<bool, ChainError> {
        if height == 0 && !work::meets_target(&hash, raw.bits) {
            return Err(ChainError::InsufficientPow);
        }

        let header = Arc::new(BlockHeader::new(raw, hash, height, chain_work));
        index.insert(header.clone());

        // Strict comparison: equal work keeps the currently-held tip.
        let heavier = match index.tip_header() {
            None => true,
            Some(tip) => header.chain_work > tip.chain_work,
        };
        if !heavier {
            debug!(%hash, height, "header stays off the main chain");
            return Ok(false);
        }

        let was_reorg = match self.install_tip(index, &header) {
            Ok(was_reorg) => was_reorg,
            Err(err) => {
                index.remove(&hash);
                return Err(err);
            }
        };

        let pruned = index.prune_orphans(PRUNE_HORIZON);
        if pruned > 0 {
            debug!(pruned, "orphan headers pruned");
        }

        if was_reorg {
            info!(%hash, height, "chain reorganized to heavier branch");
        } else {
            debug!(%hash, height, "chain tip advanced");
        }
        tip_events.push(header);
        Ok(was_reorg)
    }

    /// Rewrites `by_height` so the given header becomes the tip.
    ///
    /// Walks the new branch backward until it meets the main chain.
    /// Returns `true` when existing main-chain entries were displaced.
    fn install_tip(
        &self,
        index: &mut ChainIndex,
        header: &Arc<BlockHeader>,
    ) -> Result<bool, ChainError> {
        let old_tip_height = index.tip_header().map(|tip| tip.height);
        let floor = old_tip_height
            .filter(|&tip| tip > PRUNE_HORIZON)
            .map(|tip| tip - PRUNE_HORIZON);

        let mut path = Vec::new();
        let mut cursor = header.clone();
        loop {
            if index.is_on_main_chain(&cursor) {
                // `cursor` is the common ancestor; a fork point buried
                // past the horizon cannot be reorganized away.
                if floor.is_some_and(|floor| cursor.height < floor) {
                    return Err(ChainError::BrokenChain);
                }
                break;
            }
            if floor.is_some_and(|floor| cursor.height < floor) {
                return Err(ChainError::BrokenChain);
            }
            path.push(cursor.clone());
            if cursor.height == 0 {
                break;
            }
            cursor = index
                .get(&cursor.prev_hash)
                .cloned()
                .ok_or(ChainError::BrokenChain)?;
        }

        path.reverse();
        let fork_height = path.first().map_or(0, |first| first.height);
        let displaced = old_tip_height.is_some_and(|tip| fork_height <= tip);
        index.install_main_path(&path);
        Ok(displaced)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Loads persisted headers from the store into the index.
    ///
    /// Files are replayed in height order through the normal insertion
    /// path, so proof of work and linkage are enforced exactly as for
    /// live headers. Returns the number of headers loaded.
    ///
    /// # Errors
    ///
    /// Propagates store corruption ([`StoreError::InvalidFileSize`]) and
    /// validation failures on the persisted data.
    pub fn load(&self) -> Result<u32, StoreError> {
        let Some(store) = &self.store else { return Ok(0) };
        let files = store.load()?;
        let headers_per_file = store.headers_per_file();

        let mut loaded: u32 = 0;
        for file in files {
            if file.first_height != loaded {
                warn!(
                    expected = loaded,
                    found = file.first_height,
                    "gap in persisted files, stopping load"
                );
                break;
            }
            for chunk in file.raw.chunks_exact(HEADER_SIZE) {
                match self.insert_bytes(chunk) {
                    Ok(_) => loaded += 1,
                    Err(ChainError::DuplicateHeader) => loaded += 1,
                    Err(err) => return Err(StoreError::Chain(err)),
                }
            }
        }

        // Only whole files count as persisted; a short tail is kept in
        // memory and rewritten at the next boundary.
        self.persisted.store(loaded - (loaded % headers_per_file), Ordering::Release);
        if loaded > 0 {
            info!(network = %self.network, loaded, "headers loaded from store");
        }
        Ok(loaded)
    }

    /// Flushes every complete unpersisted file-sized span of the main
    /// chain, then updates the metadata index. Returns the number of
    /// headers flushed.
    ///
    /// # Errors
    ///
    /// Propagates I/O and serialization failures from the store.
    pub fn checkpoint(&self) -> Result<u32, StoreError> {
        let Some(store) = &self.store else { return Ok(0) };
        let headers_per_file = store.headers_per_file();
        let mut flushed = 0;

        loop {
            let persisted = self.persisted.load(Ordering::Acquire);
            let Some(end) = persisted.checked_add(headers_per_file) else { break };

            let batch = {
                let index = self.index.read();
                if index.chain_length() < end {
                    break;
                }
                index.headers_from(persisted, headers_per_file)
            };
            let Some(last) = batch.last().cloned() else { break };

            let mut raw = Vec::with_capacity(batch.len() * HEADER_SIZE);
            for header in &batch {
                raw.extend_from_slice(&header.to_bytes());
            }

            let entry = store.append_checkpoint(persisted, &raw, last.hash, &last.chain_work)?;
            store.upsert_metadata(entry)?;
            self.persisted.store(end, Ordering::Release);
            flushed += headers_per_file;
            info!(
                network = %self.network,
                first_height = persisted,
                count = headers_per_file,
                "checkpoint flushed"
            );
        }

        Ok(flushed)
    }

    /// Headers currently flushed to the store.
    #[must_use]
    pub fn persisted_count(&self) -> u32 {
        self.persisted.load(Ordering::Acquire)
    }

    /// Schedules an asynchronous checkpoint when the tip sits on a file
    /// boundary with a complete unflushed span below it.
    fn maybe_checkpoint(&self) {
        let Some(store) = &self.store else { return };
        let headers_per_file = store.headers_per_file();

        let due = {
            let index = self.index.read();
            let tip_height = index.tip_header().map_or(0, |tip| tip.height);
            tip_height > 0
                && tip_height % headers_per_file == 0
                && index.chain_length()
                    >= self.persisted.load(Ordering::Acquire).saturating_add(headers_per_file)
        };
        if !due {
            return;
        }

        // Insertion must never block on the store; flush on the
        // blocking pool when a runtime is available.
        let (Ok(handle), Some(manager)) =
            (tokio::runtime::Handle::try_current(), self.weak_self.upgrade())
        else {
            return;
        };
        handle.spawn_blocking(move || {
            if let Err(err) = manager.checkpoint() {
                warn!(error = %err, "checkpoint flush failed");
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn indexed_header_count(&self) -> usize {
        self.index.read().by_hash_len()
    }

    #[cfg(test)]
    pub(crate) fn pending_orphan_count(&self) -> usize {
        self.index.read().pending_len()
    }
}
