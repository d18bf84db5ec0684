//! Shared helpers for unit tests: deterministic low-difficulty mining.

use crate::{
    codec::{block_hash, BlockHash, RawHeader},
    work::meets_target,
};

/// A near-trivial target: roughly every second nonce satisfies it.
pub(crate) const EASY_BITS: u32 = 0x207f_ffff;

/// A target a few hundred times harder than [`EASY_BITS`], so one header
/// outweighs a long easy chain.
pub(crate) const HEAVY_BITS: u32 = 0x2000_ffff;

/// Mines a header on the given parent until its hash meets `bits`.
///
/// The seed varies the merkle root and timestamp so distinct calls
/// produce distinct headers even on the same parent.
pub(crate) fn mine_header(prev: &BlockHash, seed: u32, bits: u32) -> Vec<u8> {
    let mut merkle = [0u8; 32];
    merkle[0..4].copy_from_slice(&seed.to_le_bytes());
    merkle[31] = 0x4d;

    let mut raw = RawHeader {
        version: 1,
        prev_hash: *prev,
        merkle_root: BlockHash::from_bytes(merkle),
        time: 1_600_000_000_u32.wrapping_add(seed),
        bits,
        nonce: 0,
    };

    loop {
        let bytes = raw.encode();
        if meets_target(&block_hash(&bytes), bits) {
            return bytes.to_vec();
        }
        raw.nonce = raw.nonce.wrapping_add(1);
    }
}

pub(crate) fn mine_child(prev: &BlockHash, seed: u32) -> Vec<u8> {
    mine_header(prev, seed, EASY_BITS)
}

pub(crate) fn mine_genesis(seed: u32) -> Vec<u8> {
    mine_header(&BlockHash::ZERO, seed, EASY_BITS)
}

/// Builds a valid chain of `len` headers starting at a genesis.
pub(crate) fn build_chain(len: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut prev = BlockHash::ZERO;
    for i in 0..len {
        let bytes = mine_header(&prev, u32::try_from(i).expect("test chain length"), EASY_BITS);
        prev = block_hash(&bytes);
        out.push(bytes);
    }
    out
}
