//! Error taxonomy for consensus validation.
//!
//! `ProtocolViolation` covers everything attributable to one bad header or
//! block: the offending record is marked invalid and never retried as-is.
//! Storage failures are surfaced unchanged; state is left untouched so the
//! caller's next cycle retries the same block.

use crate::types::{hex_id, Hash};
use thiserror::Error;

/// A consensus-rule violation attributable to a single header or block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("timestamp too far in the future")]
    TimestampTooFarAhead,

    #[error("timestamp not above median time past")]
    TimestampBelowMedian,

    #[error("header hash does not match header bytes")]
    HashMismatch,

    #[error("proof of work does not meet target")]
    InsufficientProofOfWork,

    #[error("invalid compact target encoding {bits:#010x}")]
    BadTargetEncoding { bits: u32 },

    #[error("difficulty bits do not match required target")]
    UnexpectedDifficulty,

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("duplicate transaction hash inside block")]
    DuplicateHashInBlock,

    #[error("merkle root does not match transactions")]
    MerkleMismatch,

    #[error("malformed coinbase transaction")]
    BadCoinbase,

    #[error("non-coinbase transaction references the null outpoint")]
    UnexpectedNullOutpoint,

    #[error("transaction {tx} duplicates an existing unspent transaction", tx = hex_id(.tx_hash))]
    DuplicateTransaction { tx_hash: Hash },

    #[error(
        "transaction {tx} spends unknown or already spent output {prev}:{index}",
        tx = hex_id(.tx_hash),
        prev = hex_id(.prev_tx_hash)
    )]
    UnknownOrSpentOutput {
        tx_hash: Hash,
        prev_tx_hash: Hash,
        index: u32,
    },

    #[error("transaction {tx} carries a non-push opcode in a signature script", tx = hex_id(.tx_hash))]
    NonPushSignatureScript { tx_hash: Hash },

    #[error("transaction {tx} carries an unparseable script", tx = hex_id(.tx_hash))]
    MalformedScript { tx_hash: Hash },

    #[error("transaction {tx} creates more value than it consumes", tx = hex_id(.tx_hash))]
    TransactionInflation { tx_hash: Hash },

    #[error("block value created does not equal reward plus value consumed")]
    BlockBalanceMismatch,

    #[error("descends from an invalid block")]
    InvalidAncestor,
}

/// Top-level error type for chain operations.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
