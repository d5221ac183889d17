//! Network parameters.
//!
//! Everything the consensus rules quantify over is injected through this
//! record rather than read from globals, so test networks and regtest-style
//! setups only differ in the value passed to the controller.

use crate::types::BlockHeader;
use serde::{Deserialize, Serialize};

/// Fixed per-network consensus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Anchor header at height 0.
    pub genesis: BlockHeader,
    /// Blocks between difficulty retargets.
    pub retarget_interval: u32,
    /// Intended seconds between blocks.
    pub target_spacing: u32,
    /// Blocks between subsidy halvings.
    pub halving_interval: u64,
    /// Subsidy of the first halving period, in base units.
    pub initial_subsidy: u64,
    /// Maximum seconds a header timestamp may run ahead of local time.
    pub max_future_drift: u32,
    /// Easiest allowed target in compact form.
    pub pow_limit_bits: u32,
    /// Heights where a duplicated transaction hash force-spends the stale
    /// outputs instead of rejecting the block.
    pub duplicate_tx_heights: [u64; 2],
}

impl NetworkParams {
    /// Bitcoin mainnet values, including the two historical heights covered
    /// by the duplicate-transaction exception.
    pub fn bitcoin_mainnet() -> Self {
        Self {
            genesis: BlockHeader {
                version: 1,
                prev_hash: [0u8; 32],
                merkle_root: [
                    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e,
                    0x67, 0x76, 0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32,
                    0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
                ],
                timestamp: 1_231_006_505,
                bits: 0x1d00_ffff,
                nonce: 2_083_236_893,
            },
            retarget_interval: 2016,
            target_spacing: 600,
            halving_interval: 210_000,
            initial_subsidy: 50 * 100_000_000,
            max_future_drift: 2 * 60 * 60,
            pow_limit_bits: 0x1d00_ffff,
            duplicate_tx_heights: [91_842, 91_880],
        }
    }

    /// Seconds a full retarget window is expected to span.
    pub fn target_timespan(&self) -> u32 {
        self.retarget_interval * self.target_spacing
    }

    /// Whether `height` is a retarget boundary (genesis is not).
    pub fn is_retarget_height(&self, height: u64) -> bool {
        height > 0 && height % self.retarget_interval as u64 == 0
    }

    /// Subsidy for a block at `height`, halving every `halving_interval`
    /// blocks until it reaches zero.
    pub fn block_subsidy(&self, height: u64) -> u64 {
        let halvings = height / self.halving_interval;
        if halvings >= 64 {
            return 0;
        }
        self.initial_subsidy >> halvings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsidy_halves_on_schedule() {
        let params = NetworkParams::bitcoin_mainnet();
        assert_eq!(params.block_subsidy(0), 5_000_000_000);
        assert_eq!(params.block_subsidy(209_999), 5_000_000_000);
        assert_eq!(params.block_subsidy(210_000), 2_500_000_000);
        assert_eq!(params.block_subsidy(420_000), 1_250_000_000);
        assert_eq!(params.block_subsidy(210_000 * 64), 0);
    }

    #[test]
    fn retarget_boundaries() {
        let params = NetworkParams::bitcoin_mainnet();
        assert!(!params.is_retarget_height(0));
        assert!(!params.is_retarget_height(2015));
        assert!(params.is_retarget_height(2016));
        assert!(params.is_retarget_height(4032));
    }

    #[test]
    fn mainnet_genesis_hash_is_well_known() {
        let params = NetworkParams::bitcoin_mainnet();
        let hash = params.genesis.hash();
        // SHA-256 output order; the familiar 000000...6f form is this
        // reversed.
        assert_eq!(
            crate::types::hex_id(&hash),
            "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000"
        );
    }
}
