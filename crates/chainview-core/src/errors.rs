//! Chain-level error definitions.
//!
//! Transport and persistence failures have their own enums
//! ([`crate::sync::SyncError`], [`crate::store::StoreError`]) so callers
//! can make retry/abort decisions without string matching.

/// Errors produced by header decoding, validation, and index lookups.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A lookup miss. Surfaced as 404 or a nil value depending on the
    /// endpoint.
    #[error("header not found")]
    HeaderNotFound,

    /// The header is already indexed. Benign on insertion; callers at
    /// the gossip ingress log and continue.
    #[error("duplicate header")]
    DuplicateHeader,

    /// The header failed structural validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The header hash does not meet its own difficulty target.
    #[error("insufficient proof of work")]
    InsufficientPow,

    /// The header's branch cannot be linked to the main chain within the
    /// prune horizon.
    #[error("broken chain linkage")]
    BrokenChain,

    /// The header carries a timestamp outside the accepted bounds.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// A single header buffer whose length is not exactly 80 bytes.
    #[error("invalid header size: {0} bytes")]
    InvalidHeaderSize(usize),

    /// A bulk header buffer whose length is not a multiple of 80 bytes.
    #[error("invalid header data length: {0} bytes")]
    InvalidHeaderDataLength(usize),

    /// Guarded arithmetic detected an overflow that would otherwise wrap
    /// silently.
    #[error("integer overflow in conversion")]
    IntegerOverflow,
}

impl ChainError {
    /// True for outcomes that are routine at the gossip ingress and are
    /// logged rather than propagated.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::DuplicateHeader)
    }
}
