//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Block-number keys are big-endian so RocksDB iterates them in chain
//! order, which the range scans rely on.

use crate::timeframe::{Denomination, Granularity, Sorting};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};

/// Encode a block key.
///
/// Format: byte 'B' (0x42) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Decode a block key back to its block number.
pub fn decode_block_key(key: &[u8]) -> Result<u64> {
    if key.len() != 9 || key[0] != b'B' {
        anyhow::bail!("invalid block key, got {} bytes", key.len());
    }
    let bytes: [u8; 8] = key[1..9].try_into().context("invalid block key suffix")?;
    Ok(u64::from_be_bytes(bytes))
}

/// Encode a block hash index key.
///
/// Format: byte 'X' (0x58) + block_hash (32 bytes)
/// Total length: 33 bytes
pub fn encode_block_hash_key(hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'X');
    key.extend_from_slice(hash.as_slice());
    key
}

/// Encode a per-contract fees key.
///
/// Format: byte 'F' (0x46) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_contract_fees_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'F');
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Decode a per-contract fees key back to its block number.
pub fn decode_contract_fees_key(key: &[u8]) -> Result<u64> {
    if key.len() != 9 || key[0] != b'F' {
        anyhow::bail!("invalid contract fees key, got {} bytes", key.len());
    }
    let bytes: [u8; 8] = key[1..9]
        .try_into()
        .context("invalid contract fees key suffix")?;
    Ok(u64::from_be_bytes(bytes))
}

/// Encode a contract metadata key.
///
/// Format: byte 'C' (0x43) + address (20 bytes)
/// Total length: 21 bytes
pub fn encode_contract_key(addr: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(b'C');
    key.extend_from_slice(addr.as_slice());
    key
}

fn granularity_tag(granularity: Granularity) -> u8 {
    match granularity {
        Granularity::Block => 0,
        Granularity::M5 => 1,
        Granularity::H1 => 2,
        Granularity::D1 => 3,
        Granularity::D7 => 4,
    }
}

fn sorting_tag(sorting: Sorting) -> u8 {
    match sorting {
        Sorting::Max => 0,
        Sorting::Min => 1,
    }
}

fn denomination_tag(denomination: Denomination) -> u8 {
    match denomination {
        Denomination::Eth => 0,
        Denomination::Usd => 1,
    }
}

/// Encode a fee-record table key.
///
/// Format: byte 'R' (0x52) + granularity tag + sorting tag + denomination tag
/// Total length: 4 bytes
pub fn encode_fee_record_key(
    granularity: Granularity,
    sorting: Sorting,
    denomination: Denomination,
) -> Vec<u8> {
    vec![
        b'R',
        granularity_tag(granularity),
        sorting_tag(sorting),
        denomination_tag(denomination),
    ]
}

/// Encode a key-value cache key.
///
/// Format: byte 'K' (0x4B) + utf-8 key bytes
pub fn encode_cache_key(cache_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + cache_key.len());
    key.push(b'K');
    key.extend_from_slice(cache_key.as_bytes());
    key
}
