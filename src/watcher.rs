//! Ingestion controller
//!
//! Turns head notifications into an ordered sequence of block adds and
//! rollbacks against the store and the in-memory aggregators. Heads are
//! consumed one at a time from a FIFO queue; missing ancestors are
//! healed by rolling back the conflicting block and ingesting the
//! canonical parent first. The derived-stats snapshot is recomputed
//! only once the queue drains, so bursts of heads coalesce into a
//! single recompute.

use crate::burn_records::BurnRecords;
use crate::cache::KnownContractsCache;
use crate::config::Config;
use crate::fee::{calc_block_tips, calc_fee_breakdown};
use crate::leaderboard::{LeaderboardAggregator, LeaderboardEntry};
use crate::prices::{EthPrice, PriceApi};
use crate::records::{BlockRecord, ContractFeesRecord, FeeRecord};
use crate::rpc::NodeApi;
use crate::snapshot::{build_derived_stats, DERIVED_STATS_CACHE_KEY};
use crate::store::BlockStore;
use crate::timeframe::{Denomination, Granularity, Sorting, Timeframe};
use crate::types::{Block, Head};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Events published to downstream consumers (cache invalidation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A block was added to the store.
    BlockAdded(u64),
    /// The derived-stats snapshot was rewritten, carrying the newest
    /// block number it reflects.
    StatsUpdated(u64),
}

/// The ingestion controller.
///
/// Owns every piece of mutable aggregation state; all mutation happens
/// from the single task driving `run`, so ordering is total.
pub struct Watcher<N, P, S> {
    node: N,
    prices: P,
    store: S,
    config: Config,
    leaderboard: LeaderboardAggregator,
    burn_records: BurnRecords,
    contracts: KnownContractsCache,
    publisher: broadcast::Sender<Notification>,
}

impl<N: NodeApi, P: PriceApi, S: BlockStore> Watcher<N, P, S> {
    pub fn new(
        node: N,
        prices: P,
        store: S,
        config: Config,
        publisher: broadcast::Sender<Notification>,
    ) -> Self {
        let burn_records = BurnRecords::new(config.record_capacity());
        Self {
            node,
            prices,
            store,
            config,
            leaderboard: LeaderboardAggregator::new(),
            burn_records,
            contracts: KnownContractsCache::new(),
            publisher,
        }
    }

    /// Rebuild the in-memory aggregators from the store, so a restart
    /// resumes with the same windows it shut down with.
    pub fn init_from_store(&mut self) -> Result<()> {
        info!("rebuilding aggregation state from store");
        self.leaderboard
            .init_from_store(&self.store)
            .context("rebuilding leaderboards")?;
        self.burn_records
            .init_from_store(&self.store)
            .context("rebuilding burn records")?;
        if let Some(tip) = self.store.tip()? {
            info!(tip, "aggregation state rebuilt");
        } else {
            info!("store is empty, starting fresh");
        }
        Ok(())
    }

    /// Consume heads until the sender hangs up.
    pub async fn run(&mut self, mut heads: mpsc::Receiver<Head>) -> Result<()> {
        info!("starting ingestion loop");
        while let Some(head) = heads.recv().await {
            if let Err(e) = self.on_new_head(head).await {
                error!(number = head.number, "ingestion failed: {:#}", e);
                return Err(e);
            }
            if heads.is_empty() {
                self.recompute_derived_stats()?;
            } else {
                debug!("more heads queued, deferring stats recompute");
            }
        }
        info!("head queue closed, ingestion loop done");
        Ok(())
    }

    /// Process one head notification, healing missing ancestors and
    /// rolling back superseded blocks as needed.
    pub async fn on_new_head(&mut self, head: Head) -> Result<()> {
        debug!(number = head.number, "processing head");
        let mut pending: Vec<Head> = vec![head];

        while let Some(head) = pending.last().copied() {
            let Some(block) = self.fetch_block_by_hash(head.hash, head.number).await? else {
                warn!(
                    number = head.number,
                    "head no longer known to the node, skipping"
                );
                pending.pop();
                continue;
            };

            let tip = self.store.tip()?;

            // Self-heal: the parent must be in the store before this
            // block goes in. A conflicting block at the parent height is
            // part of an abandoned fork and gets rolled back first.
            if tip.is_some()
                && block.number > 0
                && !self.store.block_hash_known(block.parent_hash)?
            {
                let parent_number = block.number - 1;
                if let Some(stored) = self.store.get_block(parent_number)? {
                    if stored.hash != block.parent_hash {
                        warn!(
                            number = parent_number,
                            "stored block conflicts with incoming parent, rolling back"
                        );
                        self.rollback_to_before(parent_number)?;
                    }
                }

                let Some(parent) = self.fetch_block_by_number(parent_number).await? else {
                    warn!(
                        number = parent_number,
                        "parent no longer known to the node, dropping descendant"
                    );
                    pending.pop();
                    continue;
                };
                debug!(number = parent_number, "ingesting missing parent first");
                pending.push(parent.to_head());
                continue;
            }

            // A head at or below our tip supersedes stored blocks.
            if let Some(tip) = tip {
                if tip >= block.number {
                    info!(
                        number = block.number,
                        tip, "head below tip, rolling back superseded blocks"
                    );
                    self.rollback_to_before(block.number)?;
                }
            }

            pending.pop();
            self.ingest_block(block).await?;
        }

        Ok(())
    }

    /// Add one block: fetch receipts and a price, compute the fee
    /// breakdown, persist, and feed the aggregators.
    async fn ingest_block(&mut self, block: Block) -> Result<()> {
        let Some(receipts) = self.fetch_receipts(&block).await? else {
            warn!(
                number = block.number,
                "block superseded while fetching receipts, skipping"
            );
            return Ok(());
        };

        let eth_price = self
            .resolve_price(block.timestamp)
            .await
            .with_context(|| format!("resolving eth price for block {}", block.number))?;
        let breakdown = calc_fee_breakdown(&block, &receipts)
            .with_context(|| format!("fee breakdown for block {}", block.number))?;
        let tips = calc_block_tips(&block, &receipts)
            .with_context(|| format!("tips for block {}", block.number))?;
        let base_fee_per_gas = block
            .base_fee_per_gas
            .with_context(|| format!("block {} has no base fee", block.number))?;

        let record = BlockRecord {
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            mined_at: block.timestamp,
            gas_used: block.gas_used,
            base_fee_per_gas,
            eth_price,
            transfers_fee: breakdown.transfers_fee,
            contract_creation_fee: breakdown.contract_creation_fee,
            tips,
        };

        let fresh = self
            .contracts
            .filter_new(breakdown.per_contract_fee.keys().copied());
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "registering new contracts");
            self.store.upsert_contract_addresses(&fresh)?;
        }

        self.store.put_block(
            &record,
            &ContractFeesRecord {
                fees: breakdown.per_contract_fee.clone(),
            },
        )?;

        // No receivers is fine, the publish is best-effort.
        let _ = self.publisher.send(Notification::BlockAdded(record.number));

        self.leaderboard.add_block(&record, &breakdown.per_contract_fee);
        self.leaderboard.evict_expired(&self.store, record.mined_at)?;

        let changed = self.burn_records.add_block(&record);
        self.burn_records.persist_changed(&self.store, &changed)?;

        info!(
            number = record.number,
            tx_count = receipts.len(),
            "block added"
        );
        Ok(())
    }

    /// Roll back every stored block from the tip down to `number`
    /// inclusive, newest first, keeping aggregators and store in step.
    fn rollback_to_before(&mut self, number: u64) -> Result<()> {
        let Some(tip) = self.store.tip()? else {
            return Ok(());
        };

        for target in (number..=tip).rev() {
            let Some(record) = self.store.get_block(target)? else {
                debug!(number = target, "no stored block to roll back");
                continue;
            };

            // Re-query the fees while the rows still exist; the
            // aggregators correct themselves from these exact sums.
            let fees = self.store.get_contract_fees_in_range(target, target)?;
            self.leaderboard.rollback_block(&record, &fees);

            let changed = self.burn_records.rollback(target);
            self.burn_records.persist_changed(&self.store, &changed)?;

            self.store.delete_block(target)?;
            info!(number = target, "block rolled back");
        }

        Ok(())
    }

    /// Rewrite the derived-stats snapshot from current aggregator state
    /// and announce it.
    pub fn recompute_derived_stats(&self) -> Result<()> {
        let Some(tip) = self.store.tip()? else {
            debug!("no blocks stored, skipping stats recompute");
            return Ok(());
        };
        let Some(latest) = self.store.get_block(tip)? else {
            return Ok(());
        };

        let stats = build_derived_stats(
            &self.store,
            &self.leaderboard,
            &self.burn_records,
            &latest,
            self.config.records_count,
        )?;
        let value = serde_json::to_value(&stats).context("serializing derived stats")?;
        self.store.put_cache_value(DERIVED_STATS_CACHE_KEY, &value)?;

        let _ = self.publisher.send(Notification::StatsUpdated(tip));
        debug!(tip, "derived stats recomputed");
        Ok(())
    }

    /// Current leaderboard for one timeframe, metadata joined in.
    pub fn get_leaderboard(&self, timeframe: Timeframe) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboard.rank(&self.store, timeframe)
    }

    /// Current record table for one granularity, truncated to the
    /// served count (the slack entries stay internal).
    pub fn get_burn_records(
        &self,
        granularity: Granularity,
        sorting: Sorting,
        denomination: Denomination,
    ) -> Vec<FeeRecord> {
        let mut records = self
            .burn_records
            .records((granularity, sorting, denomination))
            .to_vec();
        records.truncate(self.config.records_count);
        records
    }

    async fn fetch_block_by_hash(&self, hash: B256, number: u64) -> Result<Option<Block>> {
        let mut attempt = 0u32;
        loop {
            match self.node.get_block_by_hash(hash).await {
                Ok(block) => return Ok(block),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_fetch_attempts {
                        error!(number, %hash, attempts = attempt, "giving up on block fetch");
                        return Err(e.context(format!(
                            "fetching block {} (0x{:x}) failed after {} attempts",
                            number, hash, attempt
                        )));
                    }
                    warn!(number, %hash, attempt, "block fetch failed, retrying: {:#}", e);
                    tokio::time::sleep(self.retry_delay()).await;
                }
            }
        }
    }

    async fn fetch_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let mut attempt = 0u32;
        loop {
            match self.node.get_block_by_number(number).await {
                Ok(block) => return Ok(block),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_fetch_attempts {
                        error!(number, attempts = attempt, "giving up on block fetch");
                        return Err(e.context(format!(
                            "fetching block {} failed after {} attempts",
                            number, attempt
                        )));
                    }
                    warn!(number, attempt, "block fetch failed, retrying: {:#}", e);
                    tokio::time::sleep(self.retry_delay()).await;
                }
            }
        }
    }

    async fn fetch_receipts(&self, block: &Block) -> Result<Option<Vec<crate::types::Receipt>>> {
        let mut attempt = 0u32;
        loop {
            match self.node.get_receipts(block).await {
                Ok(receipts) => return Ok(receipts),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_fetch_attempts {
                        error!(
                            number = block.number,
                            attempts = attempt,
                            "giving up on receipt fetch"
                        );
                        return Err(e.context(format!(
                            "fetching receipts for block {} failed after {} attempts",
                            block.number, attempt
                        )));
                    }
                    warn!(
                        number = block.number,
                        attempt, "receipt fetch failed, retrying: {:#}", e
                    );
                    tokio::time::sleep(self.retry_delay()).await;
                }
            }
        }
    }

    /// A live quote close enough to the block's mine time, or the price
    /// the most recent stored block was ingested with.
    async fn resolve_price(&self, timestamp: u64) -> Result<f64> {
        let quote: Option<EthPrice> = {
            let mut attempt = 0u32;
            loop {
                match self
                    .prices
                    .price_at(timestamp, self.config.price_max_age_secs)
                    .await
                {
                    Ok(quote) => break quote,
                    Err(e) => {
                        attempt += 1;
                        if attempt >= self.config.max_fetch_attempts {
                            warn!(
                                attempts = attempt,
                                "price feed unreachable, falling back to stored price: {:#}", e
                            );
                            break None;
                        }
                        warn!(attempt, "price fetch failed, retrying: {:#}", e);
                        tokio::time::sleep(self.retry_delay()).await;
                    }
                }
            }
        };

        if let Some(quote) = quote {
            return Ok(quote.ethusd);
        }

        if let Some(tip) = self.store.tip()? {
            if let Some(latest) = self.store.get_block(tip)? {
                warn!(
                    price = latest.eth_price,
                    from_block = tip,
                    "using stored fallback price"
                );
                return Ok(latest.eth_price);
            }
        }
        anyhow::bail!("no usable eth price: feed is stale and the store is empty")
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.config.fetch_retry_delay_secs)
    }

    /// Read access for tests and the snapshot path.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn leaderboard(&self) -> &LeaderboardAggregator {
        &self.leaderboard
    }

    pub fn burn_records(&self) -> &BurnRecords {
        &self.burn_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RocksBlockStore;
    use alloy_primitives::{B256, U256};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory node with a mutable canonical chain.
    #[derive(Default)]
    struct FakeNode {
        chain: Mutex<FakeChain>,
    }

    #[derive(Default)]
    struct FakeChain {
        by_hash: HashMap<B256, Block>,
        canonical: HashMap<u64, B256>,
    }

    impl FakeNode {
        fn insert(&self, block: Block, canonical: bool) {
            let mut chain = self.chain.lock().unwrap();
            if canonical {
                chain.canonical.insert(block.number, block.hash);
            }
            chain.by_hash.insert(block.hash, block);
        }
    }

    impl NodeApi for FakeNode {
        async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>> {
            Ok(self.chain.lock().unwrap().by_hash.get(&hash).cloned())
        }

        async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
            let chain = self.chain.lock().unwrap();
            Ok(chain
                .canonical
                .get(&number)
                .and_then(|hash| chain.by_hash.get(hash))
                .cloned())
        }

        async fn latest_head(&self) -> Result<Head> {
            let chain = self.chain.lock().unwrap();
            let (_, hash) = chain
                .canonical
                .iter()
                .max_by_key(|(number, _)| **number)
                .context("empty fake chain")?;
            Ok(chain.by_hash[hash].to_head())
        }

        async fn get_receipts(&self, _block: &Block) -> Result<Option<Vec<crate::types::Receipt>>> {
            Ok(Some(Vec::new()))
        }
    }

    struct FakePrices;

    impl PriceApi for FakePrices {
        async fn price_at(&self, timestamp: u64, _max_age: u64) -> Result<Option<EthPrice>> {
            Ok(Some(EthPrice {
                timestamp,
                ethusd: 2000.0,
            }))
        }
    }

    fn make_block(number: u64, tag: u8, parent_tag: u8) -> Block {
        Block {
            number,
            hash: B256::with_last_byte(tag),
            parent_hash: B256::with_last_byte(parent_tag),
            timestamp: 1_700_000_000 + number * 12,
            gas_used: 1_000_000,
            base_fee_per_gas: Some(U256::from(100u64)),
            transactions: Vec::new(),
        }
    }

    fn make_watcher(
        node: FakeNode,
        dir: &TempDir,
    ) -> (
        Watcher<FakeNode, FakePrices, RocksBlockStore>,
        broadcast::Receiver<Notification>,
    ) {
        let store = RocksBlockStore::open(dir.path()).unwrap();
        let (tx, rx) = broadcast::channel(64);
        let watcher = Watcher::new(node, FakePrices, store, Config::default(), tx);
        (watcher, rx)
    }

    #[tokio::test]
    async fn test_linear_ingestion() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        let b2 = make_block(2, 0x02, 0x01);
        node.insert(b1.clone(), true);
        node.insert(b2.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, mut events) = make_watcher(node, &dir);

        watcher.on_new_head(b1.to_head()).await.unwrap();
        watcher.on_new_head(b2.to_head()).await.unwrap();

        assert_eq!(watcher.store().tip().unwrap(), Some(2));
        assert_eq!(events.try_recv().unwrap(), Notification::BlockAdded(1));
        assert_eq!(events.try_recv().unwrap(), Notification::BlockAdded(2));
    }

    #[tokio::test]
    async fn test_missing_parent_is_healed() {
        // The store ends up on a stale fork at height 2; a head at
        // height 3 whose parent is unknown must roll the stale block
        // back, ingest the canonical 2, then 3, leaving an unbroken
        // chain.
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        let stale2 = make_block(2, 0xf2, 0x01);
        node.insert(b1.clone(), true);
        node.insert(stale2.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, _events) = make_watcher(node, &dir);
        watcher.on_new_head(b1.to_head()).await.unwrap();
        watcher.on_new_head(stale2.to_head()).await.unwrap();
        assert_eq!(
            watcher.store().get_block(2).unwrap().unwrap().hash,
            stale2.hash
        );

        // The chain reorganizes under us
        let b2 = make_block(2, 0x02, 0x01);
        let b3 = make_block(3, 0x03, 0x02);
        watcher.node.insert(b2.clone(), true);
        watcher.node.insert(b3.clone(), true);

        watcher.on_new_head(b3.to_head()).await.unwrap();

        assert_eq!(watcher.store().tip().unwrap(), Some(3));
        let stored2 = watcher.store().get_block(2).unwrap().unwrap();
        let stored3 = watcher.store().get_block(3).unwrap().unwrap();
        assert_eq!(stored2.hash, b2.hash);
        assert_eq!(stored3.parent_hash, stored2.hash);

        // Aggregators track the healed chain, not the stale fork
        let members: Vec<u64> = watcher
            .leaderboard()
            .member_blocks(Timeframe::M5)
            .iter()
            .map(|member| member.number)
            .collect();
        assert_eq!(members, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_head_below_tip_rolls_back() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        let b2 = make_block(2, 0x02, 0x01);
        let b3 = make_block(3, 0x03, 0x02);
        node.insert(b1.clone(), true);
        node.insert(b2.clone(), true);
        node.insert(b3.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, _events) = make_watcher(node, &dir);
        for head in [b1.to_head(), b2.to_head(), b3.to_head()] {
            watcher.on_new_head(head).await.unwrap();
        }

        // A replacement block arrives at height 2
        let b2_new = make_block(2, 0x22, 0x01);
        watcher.node.insert(b2_new.clone(), true);
        watcher.on_new_head(b2_new.to_head()).await.unwrap();

        assert_eq!(watcher.store().tip().unwrap(), Some(2));
        assert_eq!(
            watcher.store().get_block(2).unwrap().unwrap().hash,
            b2_new.hash
        );
        assert!(watcher.store().get_block(3).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_head_is_skipped() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        node.insert(b1.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, _events) = make_watcher(node, &dir);
        watcher.on_new_head(b1.to_head()).await.unwrap();

        // A head the node has already forgotten
        let phantom = make_block(2, 0xee, 0x01);
        watcher.on_new_head(phantom.to_head()).await.unwrap();
        assert_eq!(watcher.store().tip().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_derived_stats_are_written() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        node.insert(b1.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, mut events) = make_watcher(node, &dir);
        watcher.on_new_head(b1.to_head()).await.unwrap();
        watcher.recompute_derived_stats().unwrap();

        let stats = watcher
            .store()
            .get_cache_value(DERIVED_STATS_CACHE_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stats["block_number"], 1);
        assert!(stats["timeframes"]["5m"]["leaderboard"].is_array());

        assert_eq!(events.try_recv().unwrap(), Notification::BlockAdded(1));
        assert_eq!(events.try_recv().unwrap(), Notification::StatsUpdated(1));
    }

    #[tokio::test]
    async fn test_query_accessors_serve_current_state() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        let b2 = make_block(2, 0x02, 0x01);
        node.insert(b1.clone(), true);
        node.insert(b2.clone(), true);

        let dir = TempDir::new().unwrap();
        let (mut watcher, _events) = make_watcher(node, &dir);
        watcher.on_new_head(b1.to_head()).await.unwrap();
        watcher.on_new_head(b2.to_head()).await.unwrap();

        // No contract activity, so only the two synthetic rows show up.
        let entries = watcher.get_leaderboard(Timeframe::H1).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .all(|entry| !matches!(entry, LeaderboardEntry::Contract { .. })));

        // Equal per-block sums, so the earlier block wins the tie.
        let records =
            watcher.get_burn_records(Granularity::Block, Sorting::Max, Denomination::Eth);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fee_sum, U256::from(100_000_000u64));
        assert_eq!(records[0].last_block, 1);
        assert_eq!(records[1].last_block, 2);
    }

    #[tokio::test]
    async fn test_restart_rebuilds_aggregators() {
        let node = FakeNode::default();
        let b1 = make_block(1, 0x01, 0x00);
        let b2 = make_block(2, 0x02, 0x01);
        node.insert(b1.clone(), true);
        node.insert(b2.clone(), true);

        let dir = TempDir::new().unwrap();
        {
            let (mut watcher, _events) = make_watcher(node, &dir);
            watcher.on_new_head(b1.to_head()).await.unwrap();
            watcher.on_new_head(b2.to_head()).await.unwrap();
        }

        // Fresh process over the same database
        let node = FakeNode::default();
        let (mut watcher, _events) = make_watcher(node, &dir);
        watcher.init_from_store().unwrap();

        let members: Vec<u64> = watcher
            .leaderboard()
            .member_blocks(Timeframe::H1)
            .iter()
            .map(|member| member.number)
            .collect();
        assert_eq!(members, vec![1, 2]);
    }
}
