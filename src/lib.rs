//! # Consensus-Core
//!
//! Consensus engine for a Nakamoto-style blockchain: header-chain
//! management under adversarial input, block-content validation, and the
//! unspent-output update machinery that enforces the economic rules.
//!
//! ## Architecture
//!
//! The engine is layered, leaves first:
//! - Stateless rules ([`pow`], [`header_rules`], [`content_rules`], [`script`])
//! - Chain state ([`chain`], [`outputs`])
//! - Block application ([`processor`])
//! - The inclusion/reversion driver ([`controller`]) and its [`events`]
//!
//! Wire framing, peer management and persistent storage engines are
//! deliberately outside this crate; storage plugs in through the
//! [`outputs::UpdatableOutputSet`] contract and network policy through
//! [`params::NetworkParams`].
//!
//! ## Usage
//!
//! ```rust
//! use consensus_core::controller::ConsensusController;
//! use consensus_core::outputs::MemoryOutputSet;
//! use consensus_core::params::NetworkParams;
//!
//! let params = NetworkParams::bitcoin_mainnet();
//! let controller = ConsensusController::new(params, MemoryOutputSet::new());
//! let _events = controller.subscribe();
//! controller.start();
//! ```

pub mod chain;
pub mod content_rules;
pub mod controller;
pub mod error;
pub mod events;
pub mod header_rules;
pub mod outputs;
pub mod params;
pub mod pow;
pub mod processor;
pub mod script;
pub mod types;

#[cfg(test)]
mod testutil;

pub use chain::{HeaderChain, HeaderRecord, HeaderStatus};
pub use controller::ConsensusController;
pub use error::{ChainError, ProtocolViolation, Result};
pub use events::ChainEvent;
pub use outputs::{BlockUndo, MemoryOutputSet, UnspentOutput, UpdatableOutputSet};
pub use params::NetworkParams;
pub use types::{Block, BlockHeader, Hash, OutPoint, Transaction};
