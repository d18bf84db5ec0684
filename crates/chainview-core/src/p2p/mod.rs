//! Gossip ingress adapter.
//!
//! The transport itself (key management, peer discovery, the wire
//! protocol) lives outside this crate; the core only consumes a bounded
//! stream of raw announcement payloads and a per-network bootstrap peer
//! list. Each payload carries an 80-byte header (or an announcement
//! whose header is the prefix) and is fed through normal insertion.
//! Duplicate, orphan, and invalid results are logged and dropped - the
//! gossip protocol's own re-announcement makes at-most-once delivery
//! acceptable - and the adapter never blocks the transport.

use crate::{
    chain::ChainManager,
    codec::HEADER_SIZE,
    errors::ChainError,
    types::InsertOutcome,
};
use bytes::Bytes;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, sync::Arc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bound on the announcement queue between the transport and the
/// adapter. Producers use `try_send`; overflow drops the message.
pub const INGRESS_QUEUE_DEPTH: usize = 256;

/// Errors from the ingress adapter and peer list loading.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// Starting the ingress twice is a programming error; fail hard.
    #[error("P2P already started")]
    AlreadyStarted,

    #[error("peer list i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer list parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct PeerFile(HashMap<String, Vec<String>>);

/// Loads the bootstrap peer multiaddresses for one network from a JSON
/// document of the shape `{"main": ["/dns4/...", ...], ...}`.
///
/// # Errors
///
/// I/O and parse failures. An absent network key yields an empty list.
pub fn load_bootstrap_peers(path: &Path, network: &str) -> Result<Vec<String>, IngressError> {
    let data = std::fs::read(path)?;
    let peers: PeerFile = serde_json::from_slice(&data)?;
    Ok(peers.0.get(network).cloned().unwrap_or_default())
}

/// Creates the bounded announcement channel shared with the transport.
#[must_use]
pub fn announcement_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(INGRESS_QUEUE_DEPTH)
}

/// Spawns the ingress task: drains announcements into the chain
/// manager until the channel closes or shutdown is signalled.
///
/// # Errors
///
/// [`IngressError::AlreadyStarted`] when an ingress task was already
/// spawned for this manager.
pub fn spawn_ingress(
    manager: Arc<ChainManager>,
    mut announcements: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, IngressError> {
    if !manager.mark_ingress_started() {
        return Err(IngressError::AlreadyStarted);
    }

    let handle = tokio::spawn(async move {
        info!(network = %manager.network(), "p2p ingress started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = announcements.recv() => {
                    let Some(payload) = message else { break };
                    apply_announcement(&manager, &payload);
                }
            }
        }
        info!(network = %manager.network(), "p2p ingress stopped");
    });

    Ok(handle)
}

/// Feeds one announcement payload into the manager, extracting the
/// 80-byte header prefix from larger block messages.
fn apply_announcement(manager: &Arc<ChainManager>, payload: &Bytes) {
    if payload.len() < HEADER_SIZE {
        warn!(len = payload.len(), "announcement too short for a header, dropped");
        return;
    }
    let header = &payload[..HEADER_SIZE];

    match manager.insert(header) {
        Ok(InsertOutcome::Connected { reorged }) => {
            debug!(height = manager.get_height(), reorged, "gossip header connected");
        }
        Ok(InsertOutcome::Orphaned) => {
            debug!("gossip header parked as orphan");
        }
        Err(ChainError::DuplicateHeader) => {
            debug!("gossip header already known");
        }
        Err(err) => {
            warn!(error = %err, "gossip header rejected");
        }
    }
}
