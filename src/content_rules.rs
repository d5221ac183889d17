//! Stateless block-body validation.
//!
//! Structural checks over a fully materialized block: merkle commitment and
//! coinbase shape. Economic rules (balance, double spends) live in the
//! transaction processor, which needs the output set.

use std::collections::HashSet;

use crate::error::ProtocolViolation;
use crate::types::{double_sha256, Block, Hash};

/// Coinbase signature scripts must carry between 2 and 100 bytes.
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;

/// Run every structural block rule against the header commitment.
pub fn validate_block_content(block: &Block) -> Result<(), ProtocolViolation> {
    check_merkle_tree(block)?;
    check_coinbase(block)
}

/// The transaction list must be non-empty, free of duplicate hashes, and
/// fold to the header's declared merkle root.
///
/// Duplicate hashes are rejected outright: the duplicate-last pairing step
/// lets two different transaction lists share a root (CVE-2012-2459), so a
/// block carrying the same hash twice is treated as forged.
pub fn check_merkle_tree(block: &Block) -> Result<(), ProtocolViolation> {
    if block.transactions.is_empty() {
        return Err(ProtocolViolation::EmptyBlock);
    }
    let hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
    let mut seen = HashSet::with_capacity(hashes.len());
    for hash in &hashes {
        if !seen.insert(hash) {
            return Err(ProtocolViolation::DuplicateHashInBlock);
        }
    }
    if merkle_root(&hashes) != block.header.merkle_root {
        return Err(ProtocolViolation::MerkleMismatch);
    }
    Ok(())
}

/// Fold transaction hashes into a merkle root with the standard pairing:
/// concatenate each pair, double-hash, duplicate the last entry of odd
/// levels. A single hash is its own root.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut bytes = [0u8; 64];
            bytes[..32].copy_from_slice(&left);
            bytes[32..].copy_from_slice(&right);
            next.push(double_sha256(&bytes));
        }
        level = next;
    }
    level.first().copied().unwrap_or([0u8; 32])
}

/// Transaction 0 must be the block's only coinbase: a single input spending
/// the null outpoint with a bounded signature script. No later transaction
/// may reference the null outpoint.
pub fn check_coinbase(block: &Block) -> Result<(), ProtocolViolation> {
    let coinbase = block
        .transactions
        .first()
        .ok_or(ProtocolViolation::EmptyBlock)?;
    if coinbase.inputs.len() != 1 || !coinbase.inputs[0].prevout.is_null() {
        return Err(ProtocolViolation::BadCoinbase);
    }
    let script_len = coinbase.inputs[0].sig_script.len();
    if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&script_len) {
        return Err(ProtocolViolation::BadCoinbase);
    }
    for tx in &block.transactions[1..] {
        if tx.inputs.iter().any(|input| input.prevout.is_null()) {
            return Err(ProtocolViolation::UnexpectedNullOutpoint);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{block_on, coinbase, easy_params, spend};
    use crate::types::OutPoint;

    #[test]
    fn empty_block_is_rejected() {
        let params = easy_params();
        let mut block = block_on(&params, &params.genesis, vec![coinbase(50, 1)]);
        block.transactions.clear();
        assert_eq!(
            validate_block_content(&block),
            Err(ProtocolViolation::EmptyBlock)
        );
    }

    #[test]
    fn single_transaction_root_is_its_hash() {
        let tx = coinbase(50, 1);
        assert_eq!(merkle_root(&[tx.hash()]), tx.hash());
    }

    #[test]
    fn odd_level_duplicates_last_entry() {
        let hashes = [[1u8; 32], [2u8; 32], [3u8; 32]];
        let mut ab = [0u8; 64];
        ab[..32].copy_from_slice(&hashes[0]);
        ab[32..].copy_from_slice(&hashes[1]);
        let mut cc = [0u8; 64];
        cc[..32].copy_from_slice(&hashes[2]);
        cc[32..].copy_from_slice(&hashes[2]);
        let mut top = [0u8; 64];
        top[..32].copy_from_slice(&double_sha256(&ab));
        top[32..].copy_from_slice(&double_sha256(&cc));
        assert_eq!(merkle_root(&hashes), double_sha256(&top));
    }

    #[test]
    fn tampered_transaction_list_breaks_commitment() {
        let params = easy_params();
        let block_a = block_on(&params, &params.genesis, vec![coinbase(50, 1)]);
        let block_b = block_on(&params, &params.genesis, vec![coinbase(50, 2)]);

        // Swap the bodies while keeping both headers: both commitments fail.
        let swapped_a = Block {
            header: block_a.header,
            transactions: block_b.transactions.clone(),
        };
        let swapped_b = Block {
            header: block_b.header,
            transactions: block_a.transactions.clone(),
        };
        assert_eq!(
            check_merkle_tree(&swapped_a),
            Err(ProtocolViolation::MerkleMismatch)
        );
        assert_eq!(
            check_merkle_tree(&swapped_b),
            Err(ProtocolViolation::MerkleMismatch)
        );
        assert!(check_merkle_tree(&block_a).is_ok());
    }

    #[test]
    fn duplicate_hash_in_block_is_rejected() {
        let params = easy_params();
        let tx = spend(OutPoint::new([7; 32], 0), &[10]);
        let block = block_on(
            &params,
            &params.genesis,
            vec![coinbase(50, 1), tx.clone(), tx],
        );
        assert_eq!(
            check_merkle_tree(&block),
            Err(ProtocolViolation::DuplicateHashInBlock)
        );
    }

    #[test]
    fn coinbase_script_length_bounds() {
        let params = easy_params();
        let mut short = coinbase(50, 1);
        short.inputs[0].sig_script = vec![0x01];
        let block = block_on(&params, &params.genesis, vec![short]);
        assert_eq!(check_coinbase(&block), Err(ProtocolViolation::BadCoinbase));

        let mut long = coinbase(50, 1);
        long.inputs[0].sig_script = vec![0; MAX_COINBASE_SCRIPT_LEN + 1];
        let block = block_on(&params, &params.genesis, vec![long]);
        assert_eq!(check_coinbase(&block), Err(ProtocolViolation::BadCoinbase));

        let block = block_on(&params, &params.genesis, vec![coinbase(50, 1)]);
        assert!(check_coinbase(&block).is_ok());
    }

    #[test]
    fn coinbase_must_spend_null_outpoint_only_once() {
        let params = easy_params();
        let mut not_null = coinbase(50, 1);
        not_null.inputs[0].prevout = OutPoint::new([7; 32], 0);
        let block = block_on(&params, &params.genesis, vec![not_null]);
        assert_eq!(check_coinbase(&block), Err(ProtocolViolation::BadCoinbase));

        // A second transaction sneaking in a null outpoint is a second
        // coinbase in disguise.
        let mut rogue = spend(OutPoint::new([7; 32], 0), &[10]);
        rogue.inputs[0].prevout = OutPoint::null();
        let block = block_on(&params, &params.genesis, vec![coinbase(50, 1), rogue]);
        assert_eq!(
            check_coinbase(&block),
            Err(ProtocolViolation::UnexpectedNullOutpoint)
        );
    }
}
