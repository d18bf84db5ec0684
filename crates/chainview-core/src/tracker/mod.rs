//! The narrow chain-tracking capability set.
//!
//! Applications program against [`ChainTracker`] and can switch
//! seamlessly between running the chain manager embedded in-process and
//! connecting to a remote chainview server
//! ([`crate::client::RemoteClient`]).

use crate::{
    broadcast::TipSubscription,
    chain::ChainManager,
    client::ClientError,
    codec::BlockHash,
    errors::ChainError,
    types::BlockHeader,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Errors surfaced through the capability set, from either variant.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl TrackerError {
    /// True for plain lookup misses, regardless of variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Chain(ChainError::HeaderNotFound) | Self::Client(ClientError::HeaderNotFound)
        )
    }
}

/// Read access to a tracked header chain plus tip subscription.
#[async_trait]
pub trait ChainTracker: Send + Sync {
    /// The current chain tip, or `None` when no chain is known (or, for
    /// the remote variant, unreachable).
    async fn get_tip(&self) -> Option<Arc<BlockHeader>>;

    /// The current tip height; 0 when no chain is known.
    async fn get_height(&self) -> u32;

    /// The main-chain header at a height.
    async fn get_header_by_height(&self, height: u32) -> Result<Arc<BlockHeader>, TrackerError>;

    /// Any indexed header by hash.
    async fn get_header_by_hash(&self, hash: &BlockHash) -> Result<Arc<BlockHeader>, TrackerError>;

    /// Main-chain headers from `start`, at most `count`, stopping at
    /// the first miss.
    async fn get_headers(
        &self,
        start: u32,
        count: u32,
    ) -> Result<Vec<Arc<BlockHeader>>, TrackerError>;

    /// The network identifier this tracker follows.
    async fn get_network(&self) -> Result<String, TrackerError>;

    /// True iff the main-chain header at `height` carries this merkle
    /// root.
    async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, TrackerError>;

    /// Equals [`get_height`](Self::get_height).
    async fn current_height(&self) -> u32 {
        self.get_height().await
    }

    /// Registers a tip event subscriber.
    fn subscribe(&self) -> TipSubscription;
}

/// The embedded variant: queries answered from the in-memory index.
#[async_trait]
impl ChainTracker for ChainManager {
    async fn get_tip(&self) -> Option<Arc<BlockHeader>> {
        ChainManager::get_tip(self)
    }

    async fn get_height(&self) -> u32 {
        ChainManager::get_height(self)
    }

    async fn get_header_by_height(&self, height: u32) -> Result<Arc<BlockHeader>, TrackerError> {
        Ok(ChainManager::get_header_by_height(self, height)?)
    }

    async fn get_header_by_hash(&self, hash: &BlockHash) -> Result<Arc<BlockHeader>, TrackerError> {
        Ok(ChainManager::get_header_by_hash(self, hash)?)
    }

    async fn get_headers(
        &self,
        start: u32,
        count: u32,
    ) -> Result<Vec<Arc<BlockHeader>>, TrackerError> {
        Ok(ChainManager::get_headers(self, start, count))
    }

    async fn get_network(&self) -> Result<String, TrackerError> {
        Ok(self.network().to_string())
    }

    async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, TrackerError> {
        Ok(ChainManager::is_valid_root_for_height(self, root, height)?)
    }

    fn subscribe(&self) -> TipSubscription {
        ChainManager::subscribe(self)
    }
}
