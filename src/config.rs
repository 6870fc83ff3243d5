//! Runtime tunables
//!
//! Numeric knobs for the watcher: retry behavior against the node,
//! price freshness, record-table sizing, and the rollback slack that
//! keeps record tables full through plausible reorg depths.

/// Watcher configuration with production defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seconds between head polls against the node.
    pub poll_interval_secs: u64,
    /// Maximum attempts for a node fetch before giving up (fatal).
    pub max_fetch_attempts: u32,
    /// Fixed delay between fetch attempts, in seconds.
    pub fetch_retry_delay_secs: u64,
    /// Maximum age of a live price quote before falling back to the
    /// nearest stored block price, in seconds.
    pub price_max_age_secs: u64,
    /// Number of records a table serves (the public top-N).
    pub records_count: usize,
    /// How much rollback depth, expressed as wall-clock time, a record
    /// table must absorb without dropping below `records_count` entries.
    pub rollback_buffer_secs: u64,
    /// Smallest plausible block interval, used to convert the rollback
    /// buffer into a block count.
    pub min_block_interval_secs: u64,
}

impl Config {
    /// Extra record-table entries kept beyond `records_count`: one per
    /// block that could plausibly be rolled back within the buffer.
    pub fn record_slack(&self) -> usize {
        (self.rollback_buffer_secs.div_ceil(self.min_block_interval_secs)) as usize
    }

    /// Total record-table capacity.
    pub fn record_capacity(&self) -> usize {
        self.records_count + self.record_slack()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: 4,
            max_fetch_attempts: 20,
            fetch_retry_delay_secs: 3,
            price_max_age_secs: 5 * 60,
            records_count: 100,
            rollback_buffer_secs: 120,
            min_block_interval_secs: 12,
        }
    }
}
