//! The in-memory dual index over all known block headers.
//!
//! Two primary containers: `by_hash` maps every known header's hash to
//! its owning value, and `by_height` is the dense main-chain hash
//! sequence from genesis to the tip. The tip is identified by its hash
//! rather than a back-pointer, so the header itself is owned only by
//! `by_hash`. A header is an orphan iff it is in `by_hash` but not at
//! its height in `by_height`.
//!
//! Parentless headers are indexed in `by_hash` too, with
//! [`UNKNOWN_HEIGHT`] and zero chain work; a bounded adjacency map from
//! the awaited parent hash to the waiting orphan hashes drives adoption
//! (and full validation) once that parent arrives.
//!
//! All mutation is funnelled through `ChainManager` under a single
//! writer lock; this type holds no synchronization of its own.

use crate::{
    codec::BlockHash,
    types::{BlockHeader, UNKNOWN_HEIGHT},
};
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

/// Upper bound on parked parentless headers. Gossip re-announcement
/// makes dropping beyond this bound safe.
const MAX_PENDING: usize = 1024;

#[derive(Default)]
pub(crate) struct ChainIndex {
    /// Every known header, connected or parentless, keyed by its hash.
    by_hash: HashMap<BlockHash, Arc<BlockHeader>>,
    /// Main-chain hash at each height; dense from 0 to tip height.
    by_height: Vec<BlockHash>,
    /// Hash of the current tip, present iff the index is non-empty.
    tip: Option<BlockHash>,
    /// Parentless orphan hashes keyed by the parent hash they await.
    pending: HashMap<BlockHash, Vec<BlockHash>>,
    pending_count: usize,
}

impl ChainIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }

    /// Number of main-chain headers (tip height + 1, or 0 when empty).
    pub(crate) fn chain_length(&self) -> u32 {
        u32::try_from(self.by_height.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub(crate) fn get(&self, hash: &BlockHash) -> Option<&Arc<BlockHeader>> {
        self.by_hash.get(hash)
    }

    /// The header at a hash, only if it is connected (derived height
    /// known). Parentless orphans are invisible here.
    pub(crate) fn get_connected(&self, hash: &BlockHash) -> Option<&Arc<BlockHeader>> {
        self.by_hash.get(hash).filter(|h| h.height != UNKNOWN_HEIGHT)
    }

    pub(crate) fn tip_header(&self) -> Option<&Arc<BlockHeader>> {
        self.tip.as_ref().and_then(|hash| self.by_hash.get(hash))
    }

    /// Main-chain hash at a height, if within the chain.
    pub(crate) fn main_hash_at(&self, height: u32) -> Option<&BlockHash> {
        self.by_height.get(height as usize)
    }

    /// Main-chain header at a height, if within the chain.
    pub(crate) fn header_at(&self, height: u32) -> Option<&Arc<BlockHeader>> {
        self.main_hash_at(height).and_then(|hash| self.by_hash.get(hash))
    }

    /// True when the header sits on the main chain.
    pub(crate) fn is_on_main_chain(&self, header: &BlockHeader) -> bool {
        self.main_hash_at(header.height) == Some(&header.hash)
    }

    pub(crate) fn insert(&mut self, header: Arc<BlockHeader>) {
        self.by_hash.insert(header.hash, header);
    }

    pub(crate) fn remove(&mut self, hash: &BlockHash) {
        self.by_hash.remove(hash);
    }

    /// Rewrites the main chain: truncates `by_height` to the fork point
    /// and installs the given path (ordered ancestor-first, ending at
    /// the new tip).
    ///
    /// The path must be dense: the first entry's height is the truncation
    /// point, and each subsequent entry extends by one.
    pub(crate) fn install_main_path(&mut self, path: &[Arc<BlockHeader>]) {
        let Some(first) = path.first() else { return };
        self.by_height.truncate(first.height as usize);
        for header in path {
            debug_assert_eq!(header.height as usize, self.by_height.len());
            self.by_height.push(header.hash);
        }
        self.tip = path.last().map(|h| h.hash);
    }

    /// Indexes a parentless header with [`UNKNOWN_HEIGHT`] and records
    /// it for adoption once its parent arrives. Drops the header (and
    /// says so) once the orphan pool is full.
    pub(crate) fn park_orphan(&mut self, header: Arc<BlockHeader>) {
        if self.pending_count >= MAX_PENDING {
            warn!(hash = %header.hash, "orphan pool full, dropping parentless header");
            return;
        }
        self.pending_count += 1;
        self.pending.entry(header.prev_hash).or_default().push(header.hash);
        self.by_hash.insert(header.hash, header);
    }

    /// Removes and returns the parked headers waiting on the given
    /// parent hash. The headers stay indexed; the caller either
    /// reconnects them with derived fields or evicts them.
    pub(crate) fn take_pending_children(&mut self, parent: &BlockHash) -> Vec<Arc<BlockHeader>> {
        let hashes = self.pending.remove(parent).unwrap_or_default();
        self.pending_count -= hashes.len();
        hashes
            .iter()
            .filter_map(|hash| self.by_hash.get(hash).cloned())
            .collect()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending_count
    }

    /// Deletes off-main-chain headers buried deeper than the horizon.
    ///
    /// Skipped entirely while the tip is at or below the horizon, so the
    /// floor subtraction can never wrap. Parentless orphans sort above
    /// any floor and survive until adopted or evicted from the pool.
    pub(crate) fn prune_orphans(&mut self, horizon: u32) -> usize {
        let Some(tip) = self.tip_header() else { return 0 };
        if tip.height <= horizon {
            return 0;
        }
        let floor = tip.height - horizon;

        let by_height = &self.by_height;
        let before = self.by_hash.len();
        self.by_hash.retain(|hash, header| {
            header.height >= floor || by_height.get(header.height as usize) == Some(hash)
        });
        before - self.by_hash.len()
    }

    /// Main-chain headers in `[start, start + count)`, stopping at the
    /// first height past the tip.
    pub(crate) fn headers_from(&self, start: u32, count: u32) -> Vec<Arc<BlockHeader>> {
        let mut out = Vec::new();
        for offset in 0..count {
            let Some(height) = start.checked_add(offset) else { break };
            match self.header_at(height) {
                Some(header) => out.push(header.clone()),
                None => break,
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn by_hash_len(&self) -> usize {
        self.by_hash.len()
    }
}
