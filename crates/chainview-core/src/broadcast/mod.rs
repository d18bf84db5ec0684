//! Non-blocking fan-out of chain tip events.
//!
//! Each subscriber owns a 1-slot channel. Publishing iterates the
//! subscriber set and performs a non-blocking send: a full buffer drops
//! the event for that subscriber only. Subscribers that drain promptly
//! always observe the most recent tip, and the writer never blocks.

use crate::types::BlockHeader;
use dashmap::DashMap;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tracing::trace;

/// Per-subscriber channel capacity. One slot is enough: a slow reader
/// keeps the latest undelivered tip and newer events overwrite nothing.
const SUBSCRIBER_BUFFER: usize = 1;

#[derive(Default)]
struct Registry {
    subscribers: DashMap<u64, mpsc::Sender<Arc<BlockHeader>>>,
    next_id: AtomicU64,
}

/// Single-writer fan-out of tip events to any number of subscribers.
///
/// Cloning shares the underlying subscriber registry.
#[derive(Clone, Default)]
pub struct TipBroadcaster {
    registry: Arc<Registry>,
}

impl TipBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    ///
    /// Dropping the returned [`TipSubscription`] closes the channel and
    /// removes the registration; closed channels are never reused.
    #[must_use]
    pub fn subscribe(&self) -> TipSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.registry.subscribers.insert(id, tx);
        trace!(subscriber = id, "tip subscriber registered");
        TipSubscription { id, rx, registry: self.registry.clone() }
    }

    /// Publishes a tip event to every subscriber without blocking.
    ///
    /// Events to subscribers with a full buffer are dropped; subscribers
    /// whose receiving end has gone away are pruned.
    pub fn publish(&self, tip: Arc<BlockHeader>) {
        let mut closed = Vec::new();
        for entry in self.registry.subscribers.iter() {
            match entry.value().try_send(tip.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(subscriber = entry.key(), "tip event dropped: subscriber lagging");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*entry.key());
                }
            }
        }
        for id in closed {
            self.registry.subscribers.remove(&id);
            trace!(subscriber = id, "tip subscriber pruned");
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.len()
    }
}

/// The receiving end of a tip subscription.
///
/// Implements [`futures::Stream`], so it can feed an SSE response
/// directly. Dropping the subscription unregisters it.
pub struct TipSubscription {
    id: u64,
    rx: mpsc::Receiver<Arc<BlockHeader>>,
    registry: Arc<Registry>,
}

impl TipSubscription {
    /// Waits for the next tip event. Returns `None` once the broadcaster
    /// side has gone away.
    pub async fn recv(&mut self) -> Option<Arc<BlockHeader>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<BlockHeader>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for TipSubscription {
    fn drop(&mut self) {
        self.registry.subscribers.remove(&self.id);
        trace!(subscriber = self.id, "tip subscriber unregistered");
    }
}

impl futures::Stream for TipSubscription {
    type Item = Arc<BlockHeader>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
