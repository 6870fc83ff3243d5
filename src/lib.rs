//! Pyre - Ethereum fee-burn aggregation
//!
//! Follows the chain head through reorgs and maintains, per block,
//! where the burned base fees went: per-contract leaderboards over
//! sliding timeframes, historical burn-record tables, and a derived
//! stats snapshot served from a persistent RocksDB store.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;
pub mod timeframe;

// Watcher modules
pub mod burn_records;
pub mod cache;
pub mod config;
pub mod fee;
pub mod leaderboard;
pub mod prices;
pub mod rpc;
pub mod snapshot;
pub mod types;
pub mod watcher;

// Re-export the main types for convenience
pub use records::{BlockRecord, ContractFeesRecord, ContractMetaRecord, FeeRecord};
pub use store::{BlockStore, ContractFeeSums, RocksBlockStore};
pub use timeframe::{Denomination, Granularity, Sorting, Timeframe};
