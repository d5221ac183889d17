//! Stateless header validation.
//!
//! Pure rule checks over one header plus a contiguous ancestor view ending
//! at its parent. Nothing here mutates chain state; `HeaderChain::add` calls
//! in and records the verdict.

use crate::chain::Subchain;
use crate::error::ProtocolViolation;
use crate::params::NetworkParams;
use crate::pow;
use crate::types::{BlockHeader, Hash};

/// Number of ancestor timestamps considered for the median-time-past rule.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Run every header rule: future-drift bound, median time past, hash and
/// proof-of-work commitment, difficulty continuity/retarget.
pub fn validate_header(
    params: &NetworkParams,
    header: &BlockHeader,
    hash: &Hash,
    height: u64,
    ancestors: &Subchain<'_>,
    now: u32,
) -> Result<(), ProtocolViolation> {
    check_timestamp_drift(params, header, now)?;
    if header.timestamp <= median_time_past(ancestors) {
        return Err(ProtocolViolation::TimestampBelowMedian);
    }
    pow::check_proof_of_work(header, hash)?;
    check_difficulty(params, header, height, ancestors)
}

/// Header timestamps may run ahead of local time only by the configured
/// drift tolerance.
pub fn check_timestamp_drift(
    params: &NetworkParams,
    header: &BlockHeader,
    now: u32,
) -> Result<(), ProtocolViolation> {
    if header.timestamp as u64 > now as u64 + params.max_future_drift as u64 {
        return Err(ProtocolViolation::TimestampTooFarAhead);
    }
    Ok(())
}

/// Median of the last (up to) 11 ancestor timestamps. With a single
/// ancestor this degenerates to the parent's timestamp.
pub fn median_time_past(ancestors: &Subchain<'_>) -> u32 {
    if ancestors.is_empty() {
        return 0;
    }
    let span = ancestors.len().min(MEDIAN_TIME_SPAN);
    let mut times: Vec<u32> = (0..span)
        .map(|offset| ancestors.get_by_offset(offset).header.timestamp)
        .collect();
    times.sort_unstable();
    times[times.len() / 2]
}

/// Off retarget boundaries the target must match the parent's exactly; on a
/// boundary it must match the recomputed compact target for the window
/// ending at the parent.
pub fn check_difficulty(
    params: &NetworkParams,
    header: &BlockHeader,
    height: u64,
    ancestors: &Subchain<'_>,
) -> Result<(), ProtocolViolation> {
    let parent = ancestors.tip();
    if params.is_retarget_height(height) {
        let interval = params.retarget_interval as usize;
        if ancestors.len() < interval {
            // A linked chain always reaches genesis, so a short window means
            // the caller handed us a malformed view; refuse the header.
            return Err(ProtocolViolation::UnexpectedDifficulty);
        }
        let window_start = ancestors.get_by_offset(interval - 1);
        let required = pow::retarget_bits(
            params,
            parent.header.bits,
            parent.header.timestamp,
            window_start.header.timestamp,
        )?;
        if header.bits != required {
            return Err(ProtocolViolation::UnexpectedDifficulty);
        }
    } else if header.bits != parent.header.bits {
        return Err(ProtocolViolation::UnexpectedDifficulty);
    }
    Ok(())
}
