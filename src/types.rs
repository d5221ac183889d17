//! Core chain data types and their canonical serialization.
//!
//! All identities in the system are double-SHA256 hashes of the canonical
//! little-endian encoding defined here: 80 bytes for headers, variable
//! length for transactions. A record's hash is always derived, never stored
//! independently of the bytes it commits to.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 256-bit hash.
pub type Hash = [u8; 32];

/// Outpoint index used by coinbase inputs to mark the null reference.
pub const NULL_OUTPOINT_INDEX: u32 = 0xffff_ffff;

/// Reference to a transaction output: `(transaction hash, output index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: Hash, index: u32) -> Self {
        Self { tx_hash, index }
    }

    /// The null outpoint `(all-zero hash, 0xffffffff)` only a coinbase input
    /// may carry.
    pub fn null() -> Self {
        Self {
            tx_hash: [0u8; 32],
            index: NULL_OUTPOINT_INDEX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.tx_hash == [0u8; 32] && self.index == NULL_OUTPOINT_INDEX
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub sig_script: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub pubkey_script: Vec<u8>,
}

/// Transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Double-SHA256 of the canonical serialization.
    pub fn hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }

    /// A coinbase transaction has exactly one input referencing the null
    /// outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Canonical wire encoding: version, inputs, outputs, lock time, with
    /// compact-size length prefixes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.version.to_le_bytes());

        write_compact_size(&mut bytes, self.inputs.len() as u64);
        for input in &self.inputs {
            bytes.extend_from_slice(&input.prevout.tx_hash);
            bytes.extend_from_slice(&input.prevout.index.to_le_bytes());
            write_compact_size(&mut bytes, input.sig_script.len() as u64);
            bytes.extend_from_slice(&input.sig_script);
            bytes.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut bytes, self.outputs.len() as u64);
        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut bytes, output.pubkey_script.len() as u64);
            bytes.extend_from_slice(&output.pubkey_script);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }
}

/// 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Canonical 80-byte encoding the proof-of-work commits to.
    pub fn serialize(&self) -> [u8; 80] {
        let mut bytes = [0u8; 80];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(&self.prev_hash);
        bytes[36..68].copy_from_slice(&self.merkle_root);
        bytes[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.bits.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Double-SHA256 of the 80 header bytes.
    pub fn hash(&self) -> Hash {
        double_sha256(&self.serialize())
    }
}

/// Block: header plus fully materialized transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// Double SHA-256.
pub fn double_sha256(bytes: &[u8]) -> Hash {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&second);
    hash
}

/// Hex form of a hash for log and error text.
pub fn hex_id(hash: &Hash) -> String {
    hex::encode(hash)
}

fn write_compact_size(bytes: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => bytes.push(value as u8),
        0xfd..=0xffff => {
            bytes.push(0xfd);
            bytes.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            bytes.push(0xfe);
            bytes.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            bytes.push(0xff);
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
}
