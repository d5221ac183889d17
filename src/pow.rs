//! Proof-of-work arithmetic: compact targets, per-block work and the
//! difficulty retarget.
//!
//! The retarget reproduces the legacy network formula bit for bit, including
//! the historical off-by-one: the actual timespan is measured from the first
//! header of the retarget window to the parent, one spacing short of the
//! window the expected timespan describes. Compatibility requires keeping
//! it, so this module does not correct it.

use crate::error::ProtocolViolation;
use crate::params::NetworkParams;
use crate::types::{BlockHeader, Hash};

/// 256-bit unsigned integer, little-endian u64 words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct U256([u64; 4]);

impl U256 {
    pub fn zero() -> Self {
        U256([0; 4])
    }

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Interpret 32 bytes as a little-endian integer. Hash bytes compare
    /// against targets in this orientation.
    pub fn from_le_bytes(bytes: &Hash) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(buf);
        }
        U256(words)
    }

    fn bit(&self, index: usize) -> bool {
        self.0[index / 64] >> (index % 64) & 1 == 1
    }

    fn set_bit(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    /// Number of significant bits.
    fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return (i as u32) * 64 + 64 - self.0[i].leading_zeros();
            }
        }
        0
    }

    fn low_u32(&self) -> u32 {
        self.0[0] as u32
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }
        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }
        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i >= word_shift {
                result.0[i - word_shift] |= self.0[i] >> bit_shift;
                if bit_shift > 0 && i - word_shift >= 1 {
                    result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
                }
            }
        }
        result
    }

    pub fn not(&self) -> Self {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    pub fn add(&self, other: &U256) -> Self {
        let mut result = U256::zero();
        let mut carry = 0u128;
        for i in 0..4 {
            let sum = self.0[i] as u128 + other.0[i] as u128 + carry;
            result.0[i] = sum as u64;
            carry = sum >> 64;
        }
        result
    }

    fn sub(&self, other: &U256) -> Self {
        // Two's complement; callers only subtract smaller from larger.
        self.add(&other.not()).add(&U256::from_u64(1))
    }

    /// Multiply by a small scalar. Carry out of the top word is discarded,
    /// truncating 256-bit arithmetic.
    pub fn mul_u64(&self, scalar: u64) -> Self {
        let mut result = U256::zero();
        let mut carry = 0u128;
        for i in 0..4 {
            let product = self.0[i] as u128 * scalar as u128 + carry;
            result.0[i] = product as u64;
            carry = product >> 64;
        }
        result
    }

    pub fn div_u64(&self, divisor: u64) -> Self {
        let mut result = U256::zero();
        let mut remainder = 0u128;
        for i in (0..4).rev() {
            let dividend = (remainder << 64) | self.0[i] as u128;
            result.0[i] = (dividend / divisor as u128) as u64;
            remainder = dividend % divisor as u128;
        }
        result
    }

    /// Binary long division.
    fn div(&self, divisor: &U256) -> Self {
        if divisor.is_zero() {
            return U256::zero();
        }
        let mut quotient = U256::zero();
        let mut remainder = U256::zero();
        for i in (0..self.bits() as usize).rev() {
            remainder = remainder.shl(1);
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if remainder >= *divisor {
                remainder = remainder.sub(divisor);
                quotient.set_bit(i);
            }
        }
        quotient
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// Decode a compact target. Rejects the sign bit and mantissas that would
/// overflow 256 bits.
pub fn target_from_compact(bits: u32) -> Result<U256, ProtocolViolation> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return Err(ProtocolViolation::BadTargetEncoding { bits });
    }
    if mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32))
    {
        return Err(ProtocolViolation::BadTargetEncoding { bits });
    }

    let target = if exponent <= 3 {
        U256::from_u64((mantissa >> (8 * (3 - exponent))) as u64)
    } else {
        U256::from_u64(mantissa as u64).shl(8 * (exponent - 3))
    };
    Ok(target)
}

/// Encode a target in compact form, the rounding step every retarget result
/// passes through before comparison.
pub fn target_to_compact(target: &U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        target.shr(8 * (size - 3)).low_u32()
    };
    // Mantissa carrying the sign bit is bumped into the next size class.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Check a header's hash commitment and proof of work: the recomputed
/// double-SHA256 must match `expected_hash` and, read as a 256-bit integer,
/// must not exceed the compact target the header declares.
pub fn check_proof_of_work(
    header: &BlockHeader,
    expected_hash: &Hash,
) -> Result<(), ProtocolViolation> {
    let hash = header.hash();
    if hash != *expected_hash {
        return Err(ProtocolViolation::HashMismatch);
    }
    let target = target_from_compact(header.bits)?;
    if U256::from_le_bytes(&hash) > target {
        return Err(ProtocolViolation::InsufficientProofOfWork);
    }
    Ok(())
}

/// Work contributed by one block: `~target / (target + 1) + 1`, the expected
/// number of hash attempts the target represents.
pub fn block_work(bits: u32) -> U256 {
    let target = match target_from_compact(bits) {
        Ok(target) => target,
        Err(_) => return U256::zero(),
    };
    target
        .not()
        .div(&target.add(&U256::from_u64(1)))
        .add(&U256::from_u64(1))
}

/// Compact bits required at a retarget boundary.
///
/// `parent_time` is the timestamp of the boundary block's parent,
/// `window_start_time` the timestamp of the first header in the
/// `retarget_interval`-long window ending at that parent.
pub fn retarget_bits(
    params: &NetworkParams,
    parent_bits: u32,
    parent_time: u32,
    window_start_time: u32,
) -> Result<u32, ProtocolViolation> {
    let target_timespan = params.target_timespan() as i64;
    let mut actual_timespan = parent_time as i64 - window_start_time as i64;
    if actual_timespan < target_timespan / 4 {
        actual_timespan = target_timespan / 4;
    }
    if actual_timespan > target_timespan * 4 {
        actual_timespan = target_timespan * 4;
    }

    let old_target = target_from_compact(parent_bits)?;
    let mut new_target = old_target
        .mul_u64(actual_timespan as u64)
        .div_u64(target_timespan as u64);

    let pow_limit = target_from_compact(params.pow_limit_bits)?;
    if new_target > pow_limit {
        new_target = pow_limit;
    }
    Ok(target_to_compact(&new_target))
}
