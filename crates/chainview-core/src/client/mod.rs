//! HTTP client for a remote chainview server.
//!
//! Query endpoints are plain REST calls against the `/v2` surface. Tip
//! subscriptions ride the server's SSE stream: the stream is opened on
//! the first subscriber, feeds an internal [`TipBroadcaster`] fan-out,
//! keeps the latest tip cached for lock-free `get_tip` answers, and is
//! torn down once the last subscriber leaves.

use crate::{
    broadcast::{TipBroadcaster, TipSubscription},
    codec::{self, BlockHash, HEADER_SIZE},
    errors::ChainError,
    tracker::{ChainTracker, TrackerError},
    types::BlockHeader,
    work::ChainWork,
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

/// Per-request timeout for REST calls. The SSE stream is exempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the remote client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server request failed: {0}")]
    ServerRequestFailed(#[from] reqwest::Error),

    #[error("server returned error status: {0}")]
    ServerReturnedError(u16),

    #[error("SSE stream failed: status {0}")]
    SseStreamFailed(u16),

    #[error("header not found")]
    HeaderNotFound,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// The standard response envelope of the query surface.
#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default = "Option::default")]
    value: Option<T>,
}

struct Inner {
    base_url: String,
    http: reqwest::Client,
    broadcaster: TipBroadcaster,
    cached_tip: ArcSwapOption<BlockHeader>,
    stream_running: AtomicBool,
}

/// HTTP client for a remote chainview server. Cheap to clone.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

impl RemoteClient {
    /// Creates a client for the given base URL. A missing scheme
    /// defaults to `http://`; a trailing slash is stripped.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base = base_url.to_string();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{base}");
        }
        let base = base.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent("chainview-client/0.2")
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                base_url: base,
                http,
                broadcaster: TipBroadcaster::new(),
                cached_tip: ArcSwapOption::empty(),
                stream_running: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Fetches and unwraps a `{"status":"success","value":...}` body.
    async fn fetch_envelope<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.inner.base_url);
        let response = self
            .inner
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::HeaderNotFound);
        }
        if !status.is_success() {
            return Err(ClientError::ServerReturnedError(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.status != "success" {
            return Err(ClientError::ServerReturnedError(status.as_u16()));
        }
        envelope.value.ok_or(ClientError::HeaderNotFound)
    }

    /// Fetches the current tip via REST, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Transport failures and [`ClientError::HeaderNotFound`] on an
    /// empty chain.
    pub async fn fetch_tip(&self) -> Result<Arc<BlockHeader>, ClientError> {
        self.fetch_envelope::<BlockHeader>("/v2/tip").await.map(Arc::new)
    }

    /// Fetches a header by height.
    ///
    /// # Errors
    ///
    /// Transport failures and [`ClientError::HeaderNotFound`].
    pub async fn header_by_height(&self, height: u32) -> Result<Arc<BlockHeader>, ClientError> {
        self.fetch_envelope::<BlockHeader>(&format!("/v2/header/height/{height}"))
            .await
            .map(Arc::new)
    }

    /// Fetches a header by hash.
    ///
    /// # Errors
    ///
    /// Transport failures and [`ClientError::HeaderNotFound`].
    pub async fn header_by_hash(&self, hash: &BlockHash) -> Result<Arc<BlockHeader>, ClientError> {
        self.fetch_envelope::<BlockHeader>(&format!("/v2/header/hash/{hash}"))
            .await
            .map(Arc::new)
    }

    /// Fetches a span of raw headers and derives their heights.
    ///
    /// Chain work is not carried on the binary endpoint, so the parsed
    /// headers report zero work.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed payload lengths.
    pub async fn headers(
        &self,
        start: u32,
        count: u32,
    ) -> Result<Vec<Arc<BlockHeader>>, ClientError> {
        let url = format!(
            "{}/v2/headers?height={start}&count={count}",
            self.inner.base_url
        );
        let response = self
            .inner
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::ServerReturnedError(status.as_u16()));
        }

        let data = response.bytes().await?;
        if data.len() % HEADER_SIZE != 0 {
            return Err(ClientError::Chain(ChainError::InvalidHeaderDataLength(data.len())));
        }

        let mut out = Vec::with_capacity(data.len() / HEADER_SIZE);
        for (i, chunk) in data.chunks_exact(HEADER_SIZE).enumerate() {
            let raw = codec::decode_header(chunk)?;
            let height = start
                .checked_add(u32::try_from(i).map_err(|_| ChainError::IntegerOverflow)?)
                .ok_or(ChainError::IntegerOverflow)?;
            out.push(Arc::new(BlockHeader::new(
                raw,
                codec::block_hash(chunk),
                height,
                ChainWork::zero(),
            )));
        }
        Ok(out)
    }

    /// Fetches the network identifier.
    ///
    /// # Errors
    ///
    /// Transport failures and error-status envelopes.
    pub async fn network(&self) -> Result<String, ClientError> {
        self.fetch_envelope::<String>("/v2/network").await
    }

    /// Opens the SSE stream task unless one is already running.
    fn ensure_stream(&self) {
        if self.inner.stream_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_tip_stream(&inner).await;
            inner.stream_running.store(false, Ordering::SeqCst);
            inner.cached_tip.store(None);
            debug!("tip stream closed");
        });
    }
}

/// Reads `data:` frames from the server's tip stream until the last
/// subscriber leaves or the connection drops.
async fn run_tip_stream(inner: &Inner) {
    let url = format!("{}/v2/tip/stream", inner.base_url);
    let response = match inner
        .http
        .get(&url)
        .header("accept", "text/event-stream")
        .header("cache-control", "no-cache")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "tip stream connection failed");
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(error = %ClientError::SseStreamFailed(status.as_u16()), "tip stream rejected");
        return;
    }

    let mut body = Box::pin(response.bytes_stream());
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_hash: Option<BlockHash> = None;

    while let Some(chunk) = body.next().await {
        let Ok(chunk) = chunk else { break };
        buffer.extend_from_slice(&chunk);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim_start();
            if data.is_empty() {
                continue;
            }
            let Ok(header) = serde_json::from_str::<BlockHeader>(data) else {
                continue;
            };
            if last_hash == Some(header.hash) {
                continue;
            }
            last_hash = Some(header.hash);

            let header = Arc::new(header);
            inner.cached_tip.store(Some(header.clone()));
            inner.broadcaster.publish(header);
        }

        if inner.broadcaster.subscriber_count() == 0 {
            break;
        }
    }
}

#[async_trait]
impl ChainTracker for RemoteClient {
    async fn get_tip(&self) -> Option<Arc<BlockHeader>> {
        if let Some(tip) = self.inner.cached_tip.load_full() {
            return Some(tip);
        }
        self.fetch_tip().await.ok()
    }

    async fn get_height(&self) -> u32 {
        self.get_tip().await.map_or(0, |tip| tip.height)
    }

    async fn get_header_by_height(&self, height: u32) -> Result<Arc<BlockHeader>, TrackerError> {
        Ok(self.header_by_height(height).await?)
    }

    async fn get_header_by_hash(&self, hash: &BlockHash) -> Result<Arc<BlockHeader>, TrackerError> {
        Ok(self.header_by_hash(hash).await?)
    }

    async fn get_headers(
        &self,
        start: u32,
        count: u32,
    ) -> Result<Vec<Arc<BlockHeader>>, TrackerError> {
        Ok(self.headers(start, count).await?)
    }

    async fn get_network(&self) -> Result<String, TrackerError> {
        Ok(self.network().await?)
    }

    async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, TrackerError> {
        let header = self.header_by_height(height).await?;
        Ok(header.merkle_root == *root)
    }

    fn subscribe(&self) -> TipSubscription {
        let subscription = self.inner.broadcaster.subscribe();
        self.ensure_stream();
        subscription
    }
}
