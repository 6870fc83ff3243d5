//! Derived-stats snapshot
//!
//! Assembles the full set of reader-facing numbers from the in-memory
//! aggregators: per-timeframe burn totals and rates, leaderboards, and
//! the burn-record tables. The watcher serializes the result into the
//! store's cache column so readers never see a half-updated view.

use crate::burn_records::BurnRecords;
use crate::fee::{u256_to_f64, wei_to_eth_f64};
use crate::leaderboard::{LeaderboardAggregator, LeaderboardEntry};
use crate::records::{BlockRecord, FeeRecord};
use crate::store::BlockStore;
use crate::timeframe::{Denomination, Granularity, Sorting, Timeframe};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cache key the snapshot is stored under.
pub const DERIVED_STATS_CACHE_KEY: &str = "derived-stats";

/// Everything derived for one timeframe.
#[derive(Debug, Serialize)]
pub struct TimeframeStats {
    /// Total fees burned inside the window, in wei.
    pub fees_burned: alloy_primitives::U256,
    /// Total fees burned inside the window, in USD cents.
    pub fees_burned_usd: alloy_primitives::U256,
    /// ETH burned per minute over the window.
    pub burn_rate: f64,
    /// USD burned per minute over the window.
    pub burn_rate_usd: f64,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// The complete derived-stats snapshot.
#[derive(Debug, Serialize)]
pub struct DerivedStats {
    /// Newest ingested block.
    pub block_number: u64,
    /// Mine time of the newest ingested block.
    pub timestamp: u64,
    /// Priority fees paid in the newest block, in wei.
    pub tips: alloy_primitives::U256,
    pub timeframes: BTreeMap<&'static str, TimeframeStats>,
    /// Record tables keyed "granularity/sorting/denomination",
    /// truncated to the served count.
    pub records: BTreeMap<String, Vec<FeeRecord>>,
}

/// The window span in minutes used as the burn-rate denominator.
///
/// Limited timeframes use their fixed width; anchored ones use the
/// actual span of blocks in the window.
fn window_minutes(
    timeframe: Timeframe,
    aggregator: &LeaderboardAggregator,
    latest_mined_at: u64,
) -> f64 {
    let secs = match timeframe.window_secs() {
        Some(width) => width,
        None => {
            let members = aggregator.member_blocks(timeframe);
            match members.first() {
                Some(first) => latest_mined_at.saturating_sub(first.mined_at),
                None => 0,
            }
        }
    };
    (secs as f64 / 60.0).max(1.0)
}

/// Build the full snapshot from the current aggregator state.
pub fn build_derived_stats<S: BlockStore>(
    store: &S,
    aggregator: &LeaderboardAggregator,
    burn_records: &BurnRecords,
    latest: &BlockRecord,
    records_count: usize,
) -> Result<DerivedStats> {
    let mut timeframes = BTreeMap::new();
    for timeframe in Timeframe::ALL {
        let (fees_burned, fees_burned_usd) = aggregator.total_fees(timeframe);
        let minutes = window_minutes(timeframe, aggregator, latest.mined_at);
        timeframes.insert(
            timeframe.as_str(),
            TimeframeStats {
                fees_burned,
                fees_burned_usd,
                burn_rate: wei_to_eth_f64(fees_burned) / minutes,
                burn_rate_usd: u256_to_f64(fees_burned_usd) / 100.0 / minutes,
                leaderboard: aggregator.rank(store, timeframe)?,
            },
        );
    }

    let mut records = BTreeMap::new();
    for granularity in Granularity::ALL {
        for sorting in Sorting::ALL {
            for denomination in Denomination::ALL {
                let key = format!(
                    "{}/{}/{}",
                    granularity.as_str(),
                    sorting.as_str(),
                    denomination.as_str()
                );
                let mut table = burn_records
                    .records((granularity, sorting, denomination))
                    .to_vec();
                table.truncate(records_count);
                records.insert(key, table);
            }
        }
    }

    Ok(DerivedStats {
        block_number: latest.number,
        timestamp: latest.mined_at,
        tips: latest.tips,
        timeframes,
        records,
    })
}
