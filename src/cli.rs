//! CLI implementation for burnctl
//!
//! Provides a developer-friendly command-line interface for inspecting
//! the burn store. All commands output pretty JSON.

use crate::records::ContractMetaRecord;
use crate::snapshot::DERIVED_STATS_CACHE_KEY;
use crate::store::{BlockStore, RocksBlockStore};
use crate::timeframe::{Denomination, Granularity, Sorting};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

/// Burn store CLI tool
#[derive(Parser)]
#[command(name = "burnctl")]
#[command(about = "Fee-burn store CLI tool")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./burn_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get the newest stored block number
    GetTip,
    /// Get a stored block row
    GetBlock {
        /// Block number
        number: u64,
    },
    /// Get the per-contract fee map for a block
    GetFees {
        /// Block number
        number: u64,
    },
    /// Get the metadata row for a contract
    GetContract {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
    },
    /// Set the metadata row for a contract
    SetContract {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Category label
        #[arg(long)]
        category: Option<String>,
        /// Image URL
        #[arg(long)]
        image: Option<String>,
        /// Mark the contract as a bot
        #[arg(long)]
        is_bot: bool,
        /// Twitter handle
        #[arg(long)]
        twitter: Option<String>,
    },
    /// Get a persisted burn-record table
    GetRecords {
        #[arg(value_enum)]
        granularity: Granularity,
        #[arg(value_enum)]
        sorting: Sorting,
        #[arg(value_enum)]
        denomination: Denomination,
    },
    /// Get the derived-stats snapshot
    GetStats,
}

/// Pad an odd-length hex string with a leading zero.
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

/// Parse a hex string into a 20-byte address.
fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).with_context(|| format!("Invalid hex address: {}", s))?;
    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }
    Ok(Address::from_slice(&bytes))
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksBlockStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = match cli.command {
        Commands::GetTip => match store.tip()? {
            Some(number) => json!({ "tip": number }),
            None => json!({ "tip": null }),
        },
        Commands::GetBlock { number } => match store.get_block(number)? {
            Some(block) => json!({
                "block": {
                    "number": block.number,
                    "hash": format!("0x{:x}", block.hash),
                    "parent_hash": format!("0x{:x}", block.parent_hash),
                    "mined_at": block.mined_at,
                    "gas_used": block.gas_used,
                    "base_fee_per_gas": format!("0x{:x}", block.base_fee_per_gas),
                    "eth_price": block.eth_price,
                    "base_fee_sum": format!("0x{:x}", block.base_fee_sum()),
                    "transfers_fee": format!("0x{:x}", block.transfers_fee),
                    "contract_creation_fee": format!("0x{:x}", block.contract_creation_fee),
                    "tips": format!("0x{:x}", block.tips),
                }
            }),
            None => json!({ "block": null }),
        },
        Commands::GetFees { number } => match store.get_contract_fees(number)? {
            Some(fees) => {
                let mut entries: Vec<_> = fees.fees.into_iter().collect();
                entries.sort_by_key(|(address, _)| *address);
                json!({
                    "block": number,
                    "fees": entries
                        .into_iter()
                        .map(|(address, fee)| {
                            json!({
                                "address": format!("0x{:x}", address),
                                "fee": format!("0x{:x}", fee),
                            })
                        })
                        .collect::<Vec<_>>()
                })
            }
            None => json!({ "block": number, "fees": null }),
        },
        Commands::GetContract { address } => {
            let addr = parse_address(&address)?;
            match store.get_contract_meta(addr)? {
                Some(meta) => json!({
                    "address": format!("0x{:x}", addr),
                    "contract": meta,
                }),
                None => json!({
                    "address": format!("0x{:x}", addr),
                    "contract": null
                }),
            }
        }
        Commands::SetContract {
            address,
            name,
            category,
            image,
            is_bot,
            twitter,
        } => {
            let addr = parse_address(&address)?;
            let meta = ContractMetaRecord {
                name,
                category,
                image_url: image,
                is_bot,
                twitter_handle: twitter,
            };
            store.put_contract_meta(addr, &meta)?;
            json!({
                "status": "ok",
                "address": format!("0x{:x}", addr),
                "contract": meta,
            })
        }
        Commands::GetRecords {
            granularity,
            sorting,
            denomination,
        } => {
            let records = store.get_fee_records(granularity, sorting, denomination)?;
            json!({
                "granularity": granularity.as_str(),
                "sorting": sorting.as_str(),
                "denomination": denomination.as_str(),
                "records": records
                    .iter()
                    .map(|record| {
                        json!({
                            "first_block": record.first_block,
                            "last_block": record.last_block,
                            "fee_sum": format!("0x{:x}", record.fee_sum),
                        })
                    })
                    .collect::<Vec<_>>()
            })
        }
        Commands::GetStats => match store.get_cache_value(DERIVED_STATS_CACHE_KEY)? {
            Some(stats) => stats,
            None => json!({ "stats": null }),
        },
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
