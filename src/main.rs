//! burnctl - fee-burn store CLI tool
//!
//! A developer-friendly command-line interface for inspecting the blocks,
//! contracts, burn records, and derived stats kept in the RocksDB store.

use pyre::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
