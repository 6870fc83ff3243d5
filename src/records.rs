//! Record types for stored chain data
//!
//! These structs represent the data stored in the block store.
//! They use postcard for binary serialization, which is compact and
//! deterministic.

use crate::fee::{calc_block_base_fee_sum, wei_to_usd_cents};
use crate::timeframe::Denomination;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A canonical block row.
///
/// Immutable once stored: a different block at the same height is only
/// ever written after the old row has been rolled back and deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Parent block hash
    pub parent_hash: B256,
    /// Timestamp the block was mined at (Unix epoch seconds)
    pub mined_at: u64,
    /// Total gas used by the block
    pub gas_used: u64,
    /// Base fee per gas in wei (EIP-1559)
    pub base_fee_per_gas: U256,
    /// ETH/USD price at mine time
    pub eth_price: f64,
    /// Fees burned by plain ETH transfers, in wei
    pub transfers_fee: U256,
    /// Fees burned by contract creations, in wei
    pub contract_creation_fee: U256,
    /// Total priority fees (tips) paid, in wei
    pub tips: U256,
}

impl BlockRecord {
    /// Total base fee burned by this block, in wei.
    pub fn base_fee_sum(&self) -> U256 {
        calc_block_base_fee_sum(self.gas_used, self.base_fee_per_gas)
    }

    /// Total base fee burned by this block in the given denomination
    /// (wei, or USD cents at the block's stored price).
    pub fn base_fee_sum_in(&self, denomination: Denomination) -> U256 {
        match denomination {
            Denomination::Eth => self.base_fee_sum(),
            Denomination::Usd => wei_to_usd_cents(self.base_fee_sum(), self.eth_price),
        }
    }
}

/// Per-contract burned fees for one block, in wei.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContractFeesRecord {
    pub fees: HashMap<Address, U256>,
}

/// A historical burn-record candidate: the rolling-window fee sum that
/// was current when `last_block` was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecord {
    /// Oldest block in the window
    pub first_block: u64,
    /// Newest block in the window (the block that set the record)
    pub last_block: u64,
    /// Window fee sum (wei or USD cents depending on the table)
    pub fee_sum: U256,
}

/// Contract metadata row.
///
/// The ingestion path only registers addresses; the optional fields are
/// filled in by an external enrichment process.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContractMetaRecord {
    pub name: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub is_bot: bool,
    pub twitter_handle: Option<String>,
}
