//! One-shot startup synchronization.
//!
//! Two ingress modes, tried in order after the store load:
//!
//! 1. **CDN bootstrap** - fetch the metadata JSON from a configured
//!    base URL, download each referenced header file not already held
//!    locally, and feed every header through normal insertion (proof of
//!    work and linkage are enforced by the chain manager).
//! 2. **Range catch-up** - ask a remote server for its best header; if
//!    that tip is unknown locally, fetch forward windows of headers from
//!    the local tip and insert them.
//!
//! Both modes are one-shot. Failures degrade gracefully: the node
//! enters `Running` with whatever was loaded.

use crate::{
    chain::ChainManager,
    codec::{self, HEADER_SIZE},
    errors::ChainError,
    store::{StoreError, StoreMetadata},
    types::{InsertOutcome, ManagerState},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Headers requested per catch-up window.
const CATCH_UP_WINDOW: u32 = 2_000;

/// Errors from the synchronizer and the remote transport.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("SSE stream failed: status {0}")]
    SseStreamFailed(u16),

    #[error("server request failed: {0}")]
    ServerRequestFailed(#[from] reqwest::Error),

    #[error("server returned error status: {0}")]
    ServerReturnedError(u16),

    #[error("no headers returned, cannot find common ancestor")]
    NoHeadersReturned,

    #[error("could not find common ancestor")]
    CommonAncestorNotFound,

    #[error("bestblockheader endpoint failed: status {0}")]
    BestBlockHeaderFailed(u16),

    #[error("invalid file size: {0} bytes")]
    InvalidFileSize(u64),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bootstrap and catch-up driver for one chain manager.
pub struct Synchronizer {
    http: reqwest::Client,
}

impl Synchronizer {
    /// Builds the synchronizer with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client cannot be built.
    pub fn new() -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .user_agent("chainview/0.2")
            .build()?;
        Ok(Self { http })
    }

    /// Runs the full startup sequence: bootstrap, then catch-up, then
    /// the transition to `Running`. Sync failures are logged, never
    /// fatal.
    pub async fn run(
        &self,
        manager: &Arc<ChainManager>,
        bootstrap_url: Option<&str>,
        sync_url: Option<&str>,
    ) {
        manager.advance_state(ManagerState::Syncing);

        if let Some(base) = bootstrap_url {
            match self.bootstrap(manager, base).await {
                Ok(inserted) => {
                    info!(inserted, height = manager.get_height(), "bootstrap sync complete")
                }
                Err(err) => warn!(error = %err, "bootstrap sync failed, continuing"),
            }
        }

        if let Some(server) = sync_url {
            match self.catch_up(manager, server).await {
                Ok(inserted) => {
                    info!(inserted, height = manager.get_height(), "catch-up sync complete")
                }
                Err(err) => warn!(error = %err, "catch-up sync failed, continuing"),
            }
        }

        // Flush whatever the sync produced before going live.
        let manager_for_flush = Arc::clone(manager);
        let flush = tokio::task::spawn_blocking(move || manager_for_flush.checkpoint()).await;
        match flush {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "post-sync checkpoint failed"),
            Err(err) => warn!(error = %err, "post-sync checkpoint task failed"),
        }

        manager.advance_state(ManagerState::Running);
    }

    /// CDN bootstrap: fetch the metadata document from `base_url`, then
    /// every referenced header file not already covered locally.
    ///
    /// # Errors
    ///
    /// Transport failures, corrupt file sizes, and header validation
    /// failures on the downloaded data.
    pub async fn bootstrap(
        &self,
        manager: &Arc<ChainManager>,
        base_url: &str,
    ) -> Result<u32, SyncError> {
        let base = base_url.trim_end_matches('/');
        let metadata_url = format!("{base}/{}NetBlockHeaders.json", manager.network());

        let response = self.http.get(&metadata_url).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::ServerReturnedError(response.status().as_u16()));
        }
        let metadata: StoreMetadata = response.json().await?;

        let mut entries = metadata.files;
        entries.sort_by_key(|f| f.first_height);

        let mut inserted = 0u32;
        for entry in entries {
            // Skip files fully below what we already hold.
            let covered_through = manager.chain_length();
            if entry.first_height.saturating_add(entry.count) <= covered_through {
                debug!(file = %entry.file_name, "bootstrap file already covered, skipping");
                continue;
            }

            let file_url = format!("{base}/{}", entry.file_name);
            let response = self.http.get(&file_url).send().await?;
            if !response.status().is_success() {
                return Err(SyncError::ServerReturnedError(response.status().as_u16()));
            }
            let data = response.bytes().await?;
            if data.len() % HEADER_SIZE != 0 {
                return Err(SyncError::InvalidFileSize(data.len() as u64));
            }

            inserted += insert_batch(manager, &data)?;
            debug!(file = %entry.file_name, height = manager.get_height(), "bootstrap file applied");
        }

        Ok(inserted)
    }

    /// Range catch-up against a remote server.
    ///
    /// Common-ancestor discovery is the server's responsibility: windows
    /// are fetched forward from the local tip, and if nothing in the
    /// first window links to the local chain the sync fails.
    ///
    /// # Errors
    ///
    /// Transport failures, [`SyncError::NoHeadersReturned`], and
    /// [`SyncError::CommonAncestorNotFound`].
    pub async fn catch_up(
        &self,
        manager: &Arc<ChainManager>,
        server_url: &str,
    ) -> Result<u32, SyncError> {
        let server = server_url.trim_end_matches('/');

        let best = self.fetch_best_header(server).await?;
        let best_hash = codec::block_hash(&best);
        if manager.get_header_by_hash(&best_hash).is_ok() {
            debug!(%best_hash, "remote tip already known, catch-up not needed");
            return Ok(0);
        }

        let mut inserted = 0u32;
        let mut first_window = true;
        loop {
            let from = manager.get_height();
            let url = format!("{server}/v2/headers?height={from}&count={CATCH_UP_WINDOW}");
            let response = self.http.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(SyncError::ServerReturnedError(response.status().as_u16()));
            }
            let data = response.bytes().await?;
            if data.is_empty() {
                if first_window {
                    return Err(SyncError::NoHeadersReturned);
                }
                break;
            }

            let window = codec::split_headers(&data).map_err(SyncError::Chain)?;
            let mut linked = false;
            for &chunk in &window {
                match manager.insert(chunk) {
                    Ok(InsertOutcome::Connected { .. }) => {
                        inserted += 1;
                        linked = true;
                    }
                    Ok(InsertOutcome::Orphaned) => {}
                    // A duplicate links the window to the local chain.
                    Err(ChainError::DuplicateHeader) => linked = true,
                    Err(err) => return Err(err.into()),
                }
            }
            if first_window && !linked {
                return Err(SyncError::CommonAncestorNotFound);
            }
            first_window = false;

            if manager.get_header_by_hash(&best_hash).is_ok() {
                break;
            }
            if window.len() < CATCH_UP_WINDOW as usize || manager.get_height() <= from {
                // Short window or no progress: the server has nothing
                // more for us.
                break;
            }
        }

        Ok(inserted)
    }

    /// Fetches the remote server's best header (exactly 80 bytes).
    async fn fetch_best_header(&self, server: &str) -> Result<Vec<u8>, SyncError> {
        let response = self.http.get(format!("{server}/bestblockheader")).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::BestBlockHeaderFailed(response.status().as_u16()));
        }
        let data = response.bytes().await?;
        if data.len() != HEADER_SIZE {
            return Err(SyncError::Chain(ChainError::InvalidHeaderSize(data.len())));
        }
        Ok(data.to_vec())
    }
}

/// Inserts a batch of concatenated headers, tolerating duplicates.
fn insert_batch(manager: &Arc<ChainManager>, data: &[u8]) -> Result<u32, SyncError> {
    let mut inserted = 0;
    for chunk in codec::split_headers(data).map_err(SyncError::Chain)? {
        match manager.insert(chunk) {
            Ok(_) => inserted += 1,
            Err(ChainError::DuplicateHeader) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(inserted)
}
