//! The 80-byte block header wire format.
//!
//! Layout, little-endian:
//!
//! ```text
//! version(4) | prev_hash(32) | merkle_root(32) | time(4) | bits(4) | nonce(4)
//! ```
//!
//! The block hash is `SHA256(SHA256(bytes))` over the full 80 bytes.
//! Hashes are rendered as hex in byte-reversed order per the ambient
//! protocol convention, so the displayed string is the big-endian
//! rendering of the value used for proof-of-work comparison.

use crate::errors::ChainError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Serialized size of a block header in bytes.
pub const HEADER_SIZE: usize = 80;

/// A 32-byte block or merkle hash.
///
/// Stored in internal (digest) byte order; [`fmt::Display`] and the serde
/// representation use the reversed-hex convention.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The all-zero hash, used as the previous-hash of a genesis header.
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parses the reversed-hex rendering back into a hash.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidHeader`] unless the input is exactly
    /// 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let raw = hex::decode(s)
            .map_err(|e| ChainError::InvalidHeader(format!("invalid hash hex: {e}")))?;
        if raw.len() != 32 {
            return Err(ChainError::InvalidHeader(format!(
                "invalid hash length: {} bytes",
                raw.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, b) in raw.iter().rev().enumerate() {
            bytes[i] = *b;
        }
        Ok(Self(bytes))
    }

    /// Renders the hash in the reversed-hex display convention.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// The six wire fields of a block header, before any derived state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawHeader {
    pub version: u32,
    pub prev_hash: BlockHash,
    pub merkle_root: BlockHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl RawHeader {
    /// Serializes the header back into its exact 80-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }
}

/// Parses exactly one 80-byte header.
///
/// # Errors
///
/// Returns [`ChainError::InvalidHeaderSize`] for any input whose length
/// is not exactly 80 bytes.
pub fn decode_header(bytes: &[u8]) -> Result<RawHeader, ChainError> {
    if bytes.len() != HEADER_SIZE {
        return Err(ChainError::InvalidHeaderSize(bytes.len()));
    }

    let mut prev_hash = [0u8; 32];
    prev_hash.copy_from_slice(&bytes[4..36]);
    let mut merkle_root = [0u8; 32];
    merkle_root.copy_from_slice(&bytes[36..68]);

    Ok(RawHeader {
        version: u32::from_le_bytes(bytes[0..4].try_into().expect("slice length checked")),
        prev_hash: BlockHash::from_bytes(prev_hash),
        merkle_root: BlockHash::from_bytes(merkle_root),
        time: u32::from_le_bytes(bytes[68..72].try_into().expect("slice length checked")),
        bits: u32::from_le_bytes(bytes[72..76].try_into().expect("slice length checked")),
        nonce: u32::from_le_bytes(bytes[76..80].try_into().expect("slice length checked")),
    })
}

/// Splits a bulk buffer of concatenated headers into 80-byte chunks.
///
/// # Errors
///
/// Returns [`ChainError::InvalidHeaderDataLength`] when the buffer is not
/// a whole number of headers.
pub fn split_headers(data: &[u8]) -> Result<Vec<&[u8]>, ChainError> {
    if data.len() % HEADER_SIZE != 0 {
        return Err(ChainError::InvalidHeaderDataLength(data.len()));
    }
    Ok(data.chunks_exact(HEADER_SIZE).collect())
}

/// Parses a bulk buffer of concatenated headers.
///
/// # Errors
///
/// Returns [`ChainError::InvalidHeaderDataLength`] when the buffer is not
/// a whole number of headers.
pub fn decode_headers(data: &[u8]) -> Result<Vec<RawHeader>, ChainError> {
    split_headers(data)?
        .into_iter()
        .map(decode_header)
        .collect()
}

/// Computes the block hash: double SHA-256 over the 80-byte serialization.
#[must_use]
pub fn block_hash(bytes: &[u8]) -> BlockHash {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    BlockHash::from_bytes(out)
}
