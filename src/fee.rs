//! Fee breakdown calculation
//!
//! Pure functions mapping a block and its transaction receipts into a
//! classification (ETH transfer / contract creation / contract call)
//! and per-category burned-fee sums, plus the priority-fee (tip) total.

use crate::types::{Block, Receipt};
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Gas used by a plain ETH transfer. Receipts using exactly this much
/// gas are classified as transfers.
pub const MIN_TRANSFER_GAS: u64 = 21_000;

/// Burned-fee breakdown for a single block.
///
/// All amounts are base fees in wei: `gas_used * base_fee_per_gas`,
/// the portion of the transaction fee that is burned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeeBreakdown {
    /// Fees burned by plain ETH transfers.
    pub transfers_fee: U256,
    /// Fees burned by contract creations.
    pub contract_creation_fee: U256,
    /// Fees burned by contract calls, grouped by called contract.
    pub per_contract_fee: HashMap<Address, U256>,
}

/// Base fee burned by a single receipt.
fn receipt_base_fee(base_fee_per_gas: U256, receipt: &Receipt) -> U256 {
    U256::from(receipt.gas_used).saturating_mul(base_fee_per_gas)
}

/// Compute the fee breakdown for a block from its receipts.
///
/// Classification:
/// - no recipient            => contract creation
/// - exactly 21k gas used    => ETH transfer
/// - everything else         => contract call, grouped by recipient
///
/// A block without a base fee is malformed input (pre-London blocks are
/// outside this system's scope) and is a hard error.
pub fn calc_fee_breakdown(block: &Block, receipts: &[Receipt]) -> Result<FeeBreakdown> {
    let base_fee = block
        .base_fee_per_gas
        .with_context(|| format!("block {} has no base fee per gas", block.number))?;

    let mut breakdown = FeeBreakdown::default();

    for receipt in receipts {
        let fee = receipt_base_fee(base_fee, receipt);
        match receipt.to {
            None => {
                breakdown.contract_creation_fee = breakdown.contract_creation_fee.saturating_add(fee);
            }
            Some(_) if receipt.gas_used == MIN_TRANSFER_GAS => {
                breakdown.transfers_fee = breakdown.transfers_fee.saturating_add(fee);
            }
            Some(contract) => {
                let sum = breakdown.per_contract_fee.entry(contract).or_default();
                *sum = sum.saturating_add(fee);
            }
        }
    }

    Ok(breakdown)
}

/// Compute the total priority fees (tips) paid in a block:
/// sum of `gas_used * (effective_gas_price - base_fee_per_gas)`.
///
/// A receipt without an effective gas price is malformed input.
pub fn calc_block_tips(block: &Block, receipts: &[Receipt]) -> Result<U256> {
    let base_fee = block
        .base_fee_per_gas
        .with_context(|| format!("block {} has no base fee per gas", block.number))?;

    let mut tips = U256::ZERO;
    for receipt in receipts {
        let effective = receipt.effective_gas_price.with_context(|| {
            format!("receipt in block {} has no effective gas price", block.number)
        })?;
        let tip_per_gas = effective.saturating_sub(base_fee);
        tips = tips.saturating_add(U256::from(receipt.gas_used).saturating_mul(tip_per_gas));
    }

    Ok(tips)
}

/// The total base fee burned by a block: `gas_used * base_fee_per_gas`.
pub fn calc_block_base_fee_sum(gas_used: u64, base_fee_per_gas: U256) -> U256 {
    U256::from(gas_used).saturating_mul(base_fee_per_gas)
}

/// Convert a wei amount to an f64 ETH value.
///
/// Large sums lose precision but USD amounts are accepted to be
/// approximate; the exact wei value is kept wherever ETH is summed.
pub fn wei_to_eth_f64(wei: U256) -> f64 {
    u256_to_f64(wei) / 1e18
}

/// Lossy conversion of a U256 to f64.
pub fn u256_to_f64(value: U256) -> f64 {
    let mut out = 0.0f64;
    for (i, limb) in value.as_limbs().iter().enumerate() {
        out += (*limb as f64) * 2f64.powi(64 * i as i32);
    }
    out
}

/// Convert a wei amount into USD cents at the given ETH price.
pub fn wei_to_usd_cents(wei: U256, eth_price: f64) -> U256 {
    let cents = (wei_to_eth_f64(wei) * eth_price * 100.0).round();
    if cents <= 0.0 {
        U256::ZERO
    } else {
        U256::from(cents as u128)
    }
}
