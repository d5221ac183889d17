//! Builders shared by the integration tests: a low-difficulty network plus
//! header, transaction and block constructors.
#![allow(dead_code)]

use consensus_core::content_rules::merkle_root;
use consensus_core::pow::check_proof_of_work;
use consensus_core::types::{
    Block, BlockHeader, OutPoint, Transaction, TransactionInput, TransactionOutput,
};
use consensus_core::NetworkParams;

pub const EASY_BITS: u32 = 0x207f_ffff;

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

pub fn mine(mut header: BlockHeader) -> BlockHeader {
    loop {
        if check_proof_of_work(&header, &header.hash()).is_ok() {
            return header;
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
}

pub fn extend(
    params: &NetworkParams,
    parent: &BlockHeader,
    count: usize,
    salt: u8,
) -> Vec<BlockHeader> {
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

pub fn block_on(
    params: &NetworkParams,
    parent: &BlockHeader,
    transactions: Vec<Transaction>,
) -> Block {
    let hashes: Vec<_> = transactions.iter().map(|tx| tx.hash()).collect();
    let header = mine(BlockHeader {
        version: 1,
        prev_hash: parent.hash(),
        merkle_root: merkle_root(&hashes),
        timestamp: parent.timestamp + params.target_spacing,
        bits: parent.bits,
        nonce: 0,
    });
    Block {
        header,
        transactions,
    }
}

/// A straight chain of coinbase-only blocks from genesis.
pub fn block_chain(params: &NetworkParams, count: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut parent = params.genesis;
    for i in 0..count {
        let block = block_on(
            params,
            &parent,
            vec![coinbase(params.initial_subsidy, i as u8 + 1)],
        );
        parent = block.header;
        blocks.push(block);
    }
    blocks
}
