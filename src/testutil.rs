//! Shared helpers for unit tests: a low-difficulty network and header/block
//! builders that mine just enough to satisfy the proof-of-work check.

use crate::params::NetworkParams;
use crate::pow::check_proof_of_work;
use crate::types::{
    Block, BlockHeader, OutPoint, Transaction, TransactionInput, TransactionOutput,
};

/// Compact bits with a near-limit target so mining takes a handful of
/// attempts.
pub const EASY_BITS: u32 = 0x207f_ffff;

/// A test network: trivial difficulty, long retarget interval so short test
/// chains never hit a boundary.
pub fn easy_params() -> NetworkParams {
    NetworkParams {
        genesis: BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 1_000_000,
            bits: EASY_BITS,
            nonce: 0,
        },
        retarget_interval: 2016,
        target_spacing: 600,
        halving_interval: 210_000,
        initial_subsidy: 50 * 100_000_000,
        max_future_drift: 2 * 60 * 60,
        pow_limit_bits: EASY_BITS,
        duplicate_tx_heights: [91_842, 91_880],
    }
}

/// Like [`easy_params`] but with a small retarget interval for boundary
/// tests.
pub fn retarget_params(interval: u32) -> NetworkParams {
    NetworkParams {
        retarget_interval: interval,
        ..easy_params()
    }
}

/// Bump the nonce until the header meets its own target.
pub fn mine(mut header: BlockHeader) -> BlockHeader {
    loop {
        if check_proof_of_work(&header, &header.hash()).is_ok() {
            return header;
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// Mine `count` children of `parent`, nominally spaced, same bits. `salt`
/// varies the merkle root so distinct branches get distinct hashes.
pub fn extend(params: &NetworkParams, parent: &BlockHeader, count: usize, salt: u8) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut prev = *parent;
    for i in 0..count {
        let mut merkle_root = [salt; 32];
        merkle_root[1] = i as u8;
        let header = mine(BlockHeader {
            version: 1,
            prev_hash: prev.hash(),
            merkle_root,
            timestamp: prev.timestamp + params.target_spacing,
            bits: prev.bits,
            nonce: 0,
        });
        headers.push(header);
        prev = header;
    }
    headers
}

/// `count` headers extending genesis.
pub fn chain_of(params: &NetworkParams, count: usize) -> Vec<BlockHeader> {
    extend(params, &params.genesis, count, 0)
}

/// Coinbase with a single output claiming `value`.
pub fn coinbase(value: u64, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            sig_script: vec![0x02, tag],
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TransactionOutput {
            value,
            pubkey_script: vec![0x51],
        }],
        lock_time: 0,
    }
}

/// Spend of a single outpoint into single-output transactions.
pub fn spend(prevout: OutPoint, values: &[u64]) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout,
            sig_script: vec![0x01, 0xaa],
            sequence: 0xffff_ffff,
        }],
        outputs: values
            .iter()
            .map(|&value| TransactionOutput {
                value,
                pubkey_script: vec![0x51],
            })
            .collect(),
        lock_time: 0,
    }
}

/// Assemble a block for `parent` with the given transactions, mined and
/// carrying the correct merkle root.
pub fn block_on(params: &NetworkParams, parent: &BlockHeader, transactions: Vec<Transaction>) -> Block {
    let hashes: Vec<_> = transactions.iter().map(|tx| tx.hash()).collect();
    let header = mine(BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        merkle_root: crate::content_rules::merkle_root(&hashes),
        timestamp: parent.timestamp + params.target_spacing,
        bits: parent.bits,
        nonce: 0,
    });
    Block {
        header,
        transactions,
    }
}
