//! Timeframes, granularities, denominations, and sortings
//!
//! A `Timeframe` is a rolling leaderboard window (wall-clock or
//! block-number anchored). A `Granularity` is the fixed width of the
//! rolling-sum window used by the burn-records engine. They are distinct
//! enumerations on purpose: leaderboards answer "who burned the most in
//! the last N", records answer "what was the largest N-wide sum ever".

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Block number of the London hard fork on Ethereum mainnet, the first
/// block with a base fee burn.
pub const LONDON_HARD_FORK_BLOCK: u64 = 12_965_000;

/// Block number of the merge (Paris) on Ethereum mainnet.
pub const MERGE_BLOCK: u64 = 15_537_394;

/// A rolling leaderboard window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    M5,
    H1,
    D24,
    D7,
    D30,
    /// Anchored at the merge block, never expires.
    SinceMerge,
    /// Anchored at the London hard fork block, never expires.
    SinceBurn,
}

impl Timeframe {
    /// All timeframes, wall-clock windows first.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M5,
        Timeframe::H1,
        Timeframe::D24,
        Timeframe::D7,
        Timeframe::D30,
        Timeframe::SinceMerge,
        Timeframe::SinceBurn,
    ];

    /// The wall-clock-anchored timeframes (everything but the two
    /// block-number-anchored ones).
    pub const LIMITED: [Timeframe; 5] = [
        Timeframe::M5,
        Timeframe::H1,
        Timeframe::D24,
        Timeframe::D7,
        Timeframe::D30,
    ];

    /// Window width in seconds for wall-clock timeframes, None for the
    /// block-number-anchored ones.
    pub fn window_secs(&self) -> Option<u64> {
        match self {
            Timeframe::M5 => Some(5 * 60),
            Timeframe::H1 => Some(60 * 60),
            Timeframe::D24 => Some(24 * 60 * 60),
            Timeframe::D7 => Some(7 * 24 * 60 * 60),
            Timeframe::D30 => Some(30 * 24 * 60 * 60),
            Timeframe::SinceMerge | Timeframe::SinceBurn => None,
        }
    }

    /// Anchor block number for the block-anchored timeframes.
    pub fn anchor_block(&self) -> Option<u64> {
        match self {
            Timeframe::SinceMerge => Some(MERGE_BLOCK),
            Timeframe::SinceBurn => Some(LONDON_HARD_FORK_BLOCK),
            _ => None,
        }
    }

    /// Short identifier used in keys, logs, and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::H1 => "1h",
            Timeframe::D24 => "24h",
            Timeframe::D7 => "7d",
            Timeframe::D30 => "30d",
            Timeframe::SinceMerge => "since_merge",
            Timeframe::SinceBurn => "since_burn",
        }
    }
}

/// Width of a burn-records rolling-sum window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// A single block, window width zero.
    Block,
    M5,
    H1,
    D1,
    D7,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Block,
        Granularity::M5,
        Granularity::H1,
        Granularity::D1,
        Granularity::D7,
    ];

    /// Window width in seconds. Zero for `Block`.
    pub fn width_secs(&self) -> u64 {
        match self {
            Granularity::Block => 0,
            Granularity::M5 => 5 * 60,
            Granularity::H1 => 60 * 60,
            Granularity::D1 => 24 * 60 * 60,
            Granularity::D7 => 7 * 24 * 60 * 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Block => "block",
            Granularity::M5 => "5m",
            Granularity::H1 => "1h",
            Granularity::D1 => "1d",
            Granularity::D7 => "7d",
        }
    }
}

/// Unit a fee sum is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Denomination {
    /// Wei.
    Eth,
    /// USD cents.
    Usd,
}

impl Denomination {
    pub const ALL: [Denomination; 2] = [Denomination::Eth, Denomination::Usd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Denomination::Eth => "eth",
            Denomination::Usd => "usd",
        }
    }
}

/// Whether a record table keeps the largest or smallest historical sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Sorting {
    Max,
    Min,
}

impl Sorting {
    pub const ALL: [Sorting; 2] = [Sorting::Max, Sorting::Min];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sorting::Max => "max",
            Sorting::Min => "min",
        }
    }
}
