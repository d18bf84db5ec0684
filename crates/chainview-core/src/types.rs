//! Core domain types shared across the crate.

use crate::{
    codec::{BlockHash, RawHeader, HEADER_SIZE},
    work::ChainWork,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Sentinel height for an indexed header whose parent is not (yet)
/// known. Such orphans carry zero chain work and are replaced with a
/// fully derived header on adoption.
pub const UNKNOWN_HEIGHT: u32 = u32::MAX;

/// A block header with its derived chain position.
///
/// The six wire fields are fixed at parse time; `hash`, `height`, and
/// `chain_work` are materialized when the header is connected to the
/// chain. Values are shared read-only (behind `Arc`) with query callers
/// and subscribers and never mutated after insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: u32,
    #[schema(value_type = String)]
    pub prev_hash: BlockHash,
    #[schema(value_type = String)]
    pub merkle_root: BlockHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Double-SHA256 of the 80-byte serialization.
    #[schema(value_type = String)]
    pub hash: BlockHash,
    /// Distance from genesis along this header's own ancestry.
    pub height: u32,
    /// Cumulative work from genesis through this header.
    #[schema(value_type = String)]
    pub chain_work: ChainWork,
}

impl BlockHeader {
    /// Builds a connected header from its wire fields and derived state.
    #[must_use]
    pub fn new(raw: RawHeader, hash: BlockHash, height: u32, chain_work: ChainWork) -> Self {
        Self {
            version: raw.version,
            prev_hash: raw.prev_hash,
            merkle_root: raw.merkle_root,
            time: raw.time,
            bits: raw.bits,
            nonce: raw.nonce,
            hash,
            height,
            chain_work,
        }
    }

    /// The wire fields without derived state.
    #[must_use]
    pub fn raw(&self) -> RawHeader {
        RawHeader {
            version: self.version,
            prev_hash: self.prev_hash,
            merkle_root: self.merkle_root,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }

    /// Serializes back to the exact 80-byte wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        self.raw().encode()
    }
}

/// Lifecycle state of the chain manager.
///
/// Transitions are monotonic for the process lifetime:
/// `Loading -> Syncing -> Running`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    /// Reading the header store from disk. Queries are valid but may lag.
    Loading,
    /// The synchronizer is active, accepting bootstrap batches.
    Syncing,
    /// Steady state, driven by gossip ingress.
    Running,
}

/// Outcome of a header insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The header connected to a known parent. `reorged` is set when it
    /// (or an orphan it unblocked) displaced the previous main chain.
    Connected { reorged: bool },
    /// The parent is unknown; the header is parked awaiting adoption.
    Orphaned,
}

impl InsertOutcome {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{block_hash, decode_header};

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    fn genesis_header() -> BlockHeader {
        let bytes = hex::decode(GENESIS_HEX).unwrap();
        let raw = decode_header(&bytes).unwrap();
        BlockHeader::new(raw, block_hash(&bytes), 0, ChainWork::from_bits(raw.bits))
    }

    #[test]
    fn test_to_bytes_round_trips() {
        let header = genesis_header();
        assert_eq!(hex::encode(header.to_bytes()), GENESIS_HEX);
    }

    #[test]
    fn test_json_shape() {
        let header = genesis_header();
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["height"], 0);
        assert_eq!(
            json["hash"],
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(json["prevHash"], "0".repeat(64));
        assert!(json["merkleRoot"].is_string());
        assert!(json["chainWork"].is_string());

        let back: BlockHeader = serde_json::from_value(json).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_manager_state_is_ordered() {
        assert!(ManagerState::Loading < ManagerState::Syncing);
        assert!(ManagerState::Syncing < ManagerState::Running);
    }
}
