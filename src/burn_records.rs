//! Historical burn-record tables
//!
//! Tracks, for every granularity, the rolling fee sum over that window
//! and merges each new sum into bounded top-N tables, one per
//! granularity, sorting direction, and denomination. Tables carry slack
//! capacity beyond the served count so shallow rollbacks never leave
//! them short.

use crate::records::{BlockRecord, FeeRecord};
use crate::store::BlockStore;
use crate::timeframe::{Denomination, Granularity, Sorting};
use alloy_primitives::U256;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A block inside a granularity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeeBlock {
    number: u64,
    mined_at: u64,
    fee: U256,
}

/// How many adds' worth of evicted members are kept for rollback.
/// Deeper than any reorg the rollback buffer is sized for.
const EVICTION_HISTORY: usize = 32;

/// Rolling fee sum over one granularity window, in one denomination.
#[derive(Debug, Default)]
struct FeeSetSum {
    sum: U256,
    /// Blocks in the window, oldest first.
    member_blocks: Vec<FeeBlock>,
    /// Members each recent add slid out of the window, keyed by the
    /// added block's number, so a rollback restores them exactly.
    recent_evictions: VecDeque<(u64, Vec<FeeBlock>)>,
}

impl FeeSetSum {
    /// Slide the window forward relative to the incoming block's mine
    /// time, then add the block. A member exactly at the age cutoff is
    /// kept. Returns the record candidate for the updated window.
    fn add(&mut self, number: u64, mined_at: u64, fee: U256, width_secs: u64) -> FeeRecord {
        let keep_from = self
            .member_blocks
            .partition_point(|member| mined_at.abs_diff(member.mined_at) > width_secs);
        let evicted: Vec<FeeBlock> = self.member_blocks.drain(..keep_from).collect();
        for member in &evicted {
            self.sum = self.sum.saturating_sub(member.fee);
        }
        if !evicted.is_empty() {
            self.recent_evictions.push_back((number, evicted));
            while self.recent_evictions.len() > EVICTION_HISTORY {
                self.recent_evictions.pop_front();
            }
        }

        self.member_blocks.push(FeeBlock {
            number,
            mined_at,
            fee,
        });
        self.sum = self.sum.saturating_add(fee);

        FeeRecord {
            first_block: self.member_blocks[0].number,
            last_block: number,
            fee_sum: self.sum,
        }
    }

    /// Remove the newest member if it is the given block, and restore
    /// the members its add evicted, so sum and window return to their
    /// pre-add state.
    fn rollback(&mut self, number: u64) {
        if self
            .member_blocks
            .last()
            .is_some_and(|newest| newest.number == number)
        {
            if let Some(removed) = self.member_blocks.pop() {
                self.sum = self.sum.saturating_sub(removed.fee);
            }
            if self
                .recent_evictions
                .back()
                .is_some_and(|(evicted_by, _)| *evicted_by == number)
            {
                let (_, evicted) = self
                    .recent_evictions
                    .pop_back()
                    .unwrap_or((number, Vec::new()));
                for member in &evicted {
                    self.sum = self.sum.saturating_add(member.fee);
                }
                // Evicted members are older than everything retained.
                self.member_blocks.splice(0..0, evicted);
            }
        } else {
            debug!(block = number, "rollback target is not the newest window member");
        }
    }
}

/// Ordering of records within a table: best first. Ties on the fee sum
/// rank the earlier record (smaller `last_block`) higher, the first
/// block to reach a sum holds the record.
fn compare_records(sorting: Sorting, a: &FeeRecord, b: &FeeRecord) -> Ordering {
    let by_sum = match sorting {
        Sorting::Max => b.fee_sum.cmp(&a.fee_sum),
        Sorting::Min => a.fee_sum.cmp(&b.fee_sum),
    };
    by_sum.then_with(|| a.last_block.cmp(&b.last_block))
}

/// Bounded best-N table of fee records for one sorting direction.
#[derive(Debug)]
struct RecordTable {
    sorting: Sorting,
    capacity: usize,
    /// Best first, worst last.
    records: Vec<FeeRecord>,
}

impl RecordTable {
    fn new(sorting: Sorting, capacity: usize) -> Self {
        Self {
            sorting,
            capacity,
            records: Vec::new(),
        }
    }

    /// Merge a candidate: insert while under capacity, otherwise only
    /// if it beats the current worst. Returns whether the table changed.
    fn merge_candidate(&mut self, candidate: FeeRecord) -> bool {
        if self.records.len() < self.capacity {
            let position = self
                .records
                .partition_point(|record| compare_records(self.sorting, record, &candidate) != Ordering::Greater);
            self.records.insert(position, candidate);
            return true;
        }

        let worst = self.records[self.records.len() - 1];
        if compare_records(self.sorting, &candidate, &worst) == Ordering::Less {
            self.records.pop();
            let position = self
                .records
                .partition_point(|record| compare_records(self.sorting, record, &candidate) != Ordering::Greater);
            self.records.insert(position, candidate);
            return true;
        }
        false
    }

    /// Drop every record set by the given block. Returns whether any
    /// were removed.
    fn drop_by_last_block(&mut self, number: u64) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.last_block != number);
        before != self.records.len()
    }
}

/// A record table the engine changed during an operation, identifying
/// which persisted table needs rewriting.
pub type TableKey = (Granularity, Sorting, Denomination);

/// Burn-record engine: rolling sums and record tables across every
/// granularity, sorting, and denomination.
pub struct BurnRecords {
    capacity: usize,
    /// One per granularity x denomination, see `sum_index`.
    sums: Vec<FeeSetSum>,
    /// One per granularity x sorting x denomination, see `table_index`.
    tables: Vec<RecordTable>,
}

fn sum_index(granularity: Granularity, denomination: Denomination) -> usize {
    (granularity as usize) * Denomination::ALL.len() + denomination as usize
}

fn table_index(key: TableKey) -> usize {
    ((key.0 as usize) * Sorting::ALL.len() + key.1 as usize) * Denomination::ALL.len()
        + key.2 as usize
}

impl BurnRecords {
    pub fn new(capacity: usize) -> Self {
        let mut sums = Vec::new();
        let mut tables = Vec::new();
        for _ in Granularity::ALL {
            for _ in Denomination::ALL {
                sums.push(FeeSetSum::default());
            }
            for sorting in Sorting::ALL {
                for _ in Denomination::ALL {
                    tables.push(RecordTable::new(sorting, capacity));
                }
            }
        }
        Self {
            capacity,
            sums,
            tables,
        }
    }

    fn sum_mut(&mut self, granularity: Granularity, denomination: Denomination) -> &mut FeeSetSum {
        &mut self.sums[sum_index(granularity, denomination)]
    }

    fn table_mut(&mut self, key: TableKey) -> &mut RecordTable {
        &mut self.tables[table_index(key)]
    }

    /// Load persisted tables and rebuild the rolling sums by replaying
    /// stored blocks within the widest granularity of the tip.
    pub fn init_from_store<S: BlockStore>(&mut self, store: &S) -> Result<()> {
        let capacity = self.capacity;
        for granularity in Granularity::ALL {
            for sorting in Sorting::ALL {
                for denomination in Denomination::ALL {
                    let key = (granularity, sorting, denomination);
                    let records = store.get_fee_records(granularity, sorting, denomination)?;
                    let table = self.table_mut(key);
                    table.records = records;
                    table.records.truncate(capacity);
                }
            }
        }

        let Some(tip) = store.tip()? else {
            return Ok(());
        };
        if store.get_block(tip)?.is_none() {
            return Ok(());
        }

        let widest = Granularity::D7.width_secs();
        // 12s minimum block interval bounds the lookback.
        let lookback = widest.div_ceil(12).max(1);
        let blocks = store.get_blocks_in_range(tip.saturating_sub(lookback), tip)?;
        if blocks.is_empty() {
            warn!("no stored blocks to rebuild rolling sums from");
            return Ok(());
        }

        for block in &blocks {
            for granularity in Granularity::ALL {
                let width = granularity.width_secs();
                for denomination in Denomination::ALL {
                    let fee = block.base_fee_sum_in(denomination);
                    self.sum_mut(granularity, denomination)
                        .add(block.number, block.mined_at, fee, width);
                }
            }
        }
        Ok(())
    }

    /// Feed a block through every rolling sum and merge the resulting
    /// candidates. Returns the keys of every table that changed.
    pub fn add_block(&mut self, block: &BlockRecord) -> Vec<TableKey> {
        let mut changed = Vec::new();
        for granularity in Granularity::ALL {
            let width = granularity.width_secs();
            for denomination in Denomination::ALL {
                let fee = block.base_fee_sum_in(denomination);
                let candidate = self.sum_mut(granularity, denomination).add(
                    block.number,
                    block.mined_at,
                    fee,
                    width,
                );
                for sorting in Sorting::ALL {
                    let key = (granularity, sorting, denomination);
                    if self.table_mut(key).merge_candidate(candidate) {
                        changed.push(key);
                    }
                }
            }
        }
        changed
    }

    /// Undo a block: pop it from every rolling sum and drop every
    /// record it set. Returns the keys of every table that changed.
    pub fn rollback(&mut self, number: u64) -> Vec<TableKey> {
        let mut changed = Vec::new();
        for granularity in Granularity::ALL {
            for denomination in Denomination::ALL {
                self.sum_mut(granularity, denomination).rollback(number);
                for sorting in Sorting::ALL {
                    let key = (granularity, sorting, denomination);
                    if self.table_mut(key).drop_by_last_block(number) {
                        changed.push(key);
                    }
                }
            }
        }
        changed
    }

    /// The records currently in a table, best first.
    pub fn records(&self, key: TableKey) -> &[FeeRecord] {
        &self.tables[table_index(key)].records
    }

    /// The current rolling sum for a granularity and denomination.
    pub fn rolling_sum(&self, granularity: Granularity, denomination: Denomination) -> U256 {
        self.sums[sum_index(granularity, denomination)].sum
    }

    /// Persist every changed table.
    pub fn persist_changed<S: BlockStore>(&self, store: &S, changed: &[TableKey]) -> Result<()> {
        for &key in changed {
            store.put_fee_records(key.0, key.1, key.2, self.records(key))?;
        }
        Ok(())
    }
}
