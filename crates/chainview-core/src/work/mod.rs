//! Difficulty targets and cumulative chain work.
//!
//! The compact difficulty encoding packs a 256-bit target into 32 bits:
//! the high byte is a base-256 exponent, the low 23 bits are the
//! mantissa, and bit 23 is a sign flag. Per-header work is
//! `2^256 / (target + 1)`, summed along the ancestry to rank competing
//! chains. All arithmetic uses unbounded integers so adversarial compact
//! encodings can never overflow or panic.

use crate::{codec::BlockHash, errors::ChainError};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, ops::Add};

const COMPACT_MANTISSA_MASK: u32 = 0x007f_ffff;
const COMPACT_SIGN_BIT: u32 = 0x0080_0000;

/// Decodes the 32-bit compact difficulty encoding into an integer target.
///
/// The sign bit is preserved: encodings with bit 23 set produce negative
/// targets, which no valid proof of work can satisfy. A zero mantissa
/// yields zero regardless of exponent.
#[must_use]
pub fn compact_to_target(bits: u32) -> BigInt {
    let mantissa = bits & COMPACT_MANTISSA_MASK;
    if mantissa == 0 {
        return BigInt::zero();
    }

    let exponent = bits >> 24;
    let magnitude = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    };

    if magnitude.is_zero() {
        return BigInt::zero();
    }

    let sign = if bits & COMPACT_SIGN_BIT != 0 { Sign::Minus } else { Sign::Plus };
    BigInt::from_biguint(sign, magnitude)
}

/// Computes per-header work: `2^256 / (target + 1)`.
///
/// A non-positive target (zero mantissa or sign bit set) contributes no
/// work, so a chain built on such encodings can never outrank honest
/// headers.
#[must_use]
pub fn work_from_bits(bits: u32) -> BigUint {
    let target = compact_to_target(bits);
    if target.sign() != Sign::Plus {
        return BigUint::zero();
    }
    let target = target.magnitude().clone();
    (BigUint::one() << 256u32) / (target + BigUint::one())
}

/// Checks proof of work: the block hash, interpreted as an integer in
/// the display byte order, must not exceed the decoded target.
#[must_use]
pub fn meets_target(hash: &BlockHash, bits: u32) -> bool {
    let target = compact_to_target(bits);
    if target.sign() != Sign::Plus {
        return false;
    }
    // The digest is stored little-endian relative to its displayed hex,
    // so the numeric value reads the bytes in reverse.
    let value = BigUint::from_bytes_le(hash.as_bytes());
    value <= *target.magnitude()
}

/// Cumulative proof of work along an ancestry.
///
/// The canonical tip-selection metric: the tip is the header with the
/// maximum chain work, ties broken by first-seen. Rendered as big-endian
/// hex in JSON and in the store metadata.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ChainWork(BigUint);

impl ChainWork {
    #[must_use]
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(work_from_bits(bits))
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parses a big-endian hex rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidHeader`] for empty input or any
    /// non-hex character. No `0x` prefix or whitespace is accepted.
    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ChainError::InvalidHeader(format!(
                "invalid chain work hex: {s:?}"
            )));
        }
        BigUint::parse_bytes(s.as_bytes(), 16)
            .map(Self)
            .ok_or_else(|| ChainError::InvalidHeader(format!("invalid chain work hex: {s:?}")))
    }

    /// Renders as lowercase big-endian hex without leading zeros
    /// (`"0"` for zero work).
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_str_radix(16)
    }
}

impl Add<&ChainWork> for &ChainWork {
    type Output = ChainWork;

    fn add(self, rhs: &ChainWork) -> ChainWork {
        ChainWork(&self.0 + &rhs.0)
    }
}

impl fmt::Display for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainWork({})", self.to_hex())
    }
}

impl Serialize for ChainWork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainWork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}
