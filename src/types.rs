//! Ethereum JSON-RPC types
//!
//! Type definitions for head notifications, blocks, and transaction
//! receipts returned from Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer};

/// A new-head notification from the execution node.
///
/// Carries just enough to decide whether the block extends our chain or
/// reorganizes it; the full block is fetched separately by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
}

/// Ethereum block header with transaction hashes.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Parent block hash (hex string in JSON)
    #[serde(rename = "parentHash", deserialize_with = "deserialize_hex_b256")]
    pub parent_hash: B256,

    /// Block timestamp (Unix epoch seconds, hex string in JSON)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    /// Total gas used by the block (hex string in JSON)
    #[serde(rename = "gasUsed", deserialize_with = "deserialize_hex_u64")]
    pub gas_used: u64,

    /// Base fee per gas (EIP-1559, hex string in JSON)
    #[serde(
        rename = "baseFeePerGas",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub base_fee_per_gas: Option<U256>,

    /// Hashes of the transactions in the block
    #[serde(rename = "transactions", default)]
    pub transactions: Vec<B256>,
}

impl Block {
    /// The head notification equivalent of this block.
    pub fn to_head(&self) -> Head {
        Head {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
        }
    }
}

/// Transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    /// Transaction status: 1 = success, 0 = failure (hex string in JSON)
    #[serde(rename = "status", deserialize_with = "deserialize_hex_u64")]
    pub status: u64,

    /// Recipient address (None for contract creation, hex string in JSON)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Gas used by this transaction (hex string in JSON)
    #[serde(rename = "gasUsed", deserialize_with = "deserialize_hex_u64")]
    pub gas_used: u64,

    /// Effective gas price (post-London, hex string in JSON)
    #[serde(
        rename = "effectiveGasPrice",
        default,
        deserialize_with = "deserialize_hex_u256_opt"
    )]
    pub effective_gas_price: Option<U256>,
}

impl Receipt {
    /// Check if the transaction created a contract (no recipient).
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Check if the transaction was a plain ETH transfer (used exactly
    /// the minimum transfer gas).
    pub fn is_eth_transfer(&self) -> bool {
        self.to.is_some() && self.gas_used == crate::fee::MIN_TRANSFER_GAS
    }
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    u64::from_str_radix(s, 16).map_err(serde::de::Error::custom)
}

/// Deserialize an optional hex string to U256.
fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                Ok(Some(U256::ZERO))
            } else {
                let s = pad_hex_string(s);
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                Ok(Some(U256::from_be_slice(&bytes)))
            }
        }
        None => Ok(None),
    }
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// Deserialize an optional hex string to Address.
///
/// A missing field, null, or empty string all mean "no recipient",
/// which is how contract creations appear in receipts.
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                Ok(None)
            } else {
                let s = pad_hex_string(s);
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                if bytes.len() != 20 {
                    return Err(serde::de::Error::custom(format!(
                        "Expected 20 bytes for address, got {}",
                        bytes.len()
                    )));
                }
                Ok(Some(Address::from_slice(&bytes)))
            }
        }
        None => Ok(None),
    }
}
