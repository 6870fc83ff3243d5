//! BlockStore trait and RocksDB implementation
//!
//! The canonical block store: durable rows for blocks, per-contract fee
//! maps, contract metadata, persisted burn-record tables, and a small
//! key-value cache for derived-stats snapshots. Both aggregators read
//! ranges back from this store during eviction and rollback, so it is
//! the single source of truth the in-memory state is recomputed from.

use crate::keys::{
    decode_block_key, decode_contract_fees_key, encode_block_hash_key, encode_block_key,
    encode_cache_key, encode_contract_fees_key, encode_contract_key, encode_fee_record_key,
};
use crate::records::{BlockRecord, ContractFeesRecord, ContractMetaRecord, FeeRecord};
use crate::timeframe::{Denomination, Granularity, Sorting};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashMap;
use std::path::Path;

/// Per-contract fee sums over a block range, in both denominations.
///
/// USD amounts are derived from each block's stored ETH price, so they
/// can only be computed while the rows are still present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractFeeSums {
    pub eth: HashMap<Address, U256>,
    pub usd: HashMap<Address, U256>,
}

/// Interface to the canonical block store.
///
/// Range queries are inclusive on both ends and return rows in chain
/// order.
pub trait BlockStore {
    /// Get a block row by number.
    fn get_block(&self, number: u64) -> Result<Option<BlockRecord>>;

    /// Store a block row together with its per-contract fee map.
    fn put_block(&self, block: &BlockRecord, fees: &ContractFeesRecord) -> Result<()>;

    /// Delete a block row, its hash index entry, and its fee map.
    fn delete_block(&self, number: u64) -> Result<()>;

    /// Check whether a block with the given hash is stored.
    fn block_hash_known(&self, hash: B256) -> Result<bool>;

    /// The newest stored block number, if any.
    fn tip(&self) -> Result<Option<u64>>;

    /// Get block rows in `[from, to]`, ascending.
    fn get_blocks_in_range(&self, from: u64, to: u64) -> Result<Vec<BlockRecord>>;

    /// Sum per-contract fees over `[from, to]` in both denominations.
    fn get_contract_fees_in_range(&self, from: u64, to: u64) -> Result<ContractFeeSums>;

    /// Get the stored per-contract fee map for a single block.
    fn get_contract_fees(&self, number: u64) -> Result<Option<ContractFeesRecord>>;

    /// Register contract addresses, inserting empty metadata rows for
    /// addresses not seen before. Existing rows are left untouched.
    fn upsert_contract_addresses(&self, addresses: &[Address]) -> Result<()>;

    /// Get the metadata row for a contract.
    fn get_contract_meta(&self, address: Address) -> Result<Option<ContractMetaRecord>>;

    /// Store a metadata row for a contract (enrichment / test setup).
    fn put_contract_meta(&self, address: Address, meta: &ContractMetaRecord) -> Result<()>;

    /// Persist a burn-record table.
    fn put_fee_records(
        &self,
        granularity: Granularity,
        sorting: Sorting,
        denomination: Denomination,
        records: &[FeeRecord],
    ) -> Result<()>;

    /// Read back a persisted burn-record table. Missing tables are empty.
    fn get_fee_records(
        &self,
        granularity: Granularity,
        sorting: Sorting,
        denomination: Denomination,
    ) -> Result<Vec<FeeRecord>>;

    /// Store a JSON value under a cache key.
    fn put_cache_value(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Read a JSON value from the cache.
    fn get_cache_value(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

/// RocksDB-backed block store.
pub struct RocksBlockStore {
    db: DB,
}

impl RocksBlockStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new("blocks", Options::default()),
            ColumnFamilyDescriptor::new("block_hashes", Options::default()),
            ColumnFamilyDescriptor::new("contract_fees", Options::default()),
            ColumnFamilyDescriptor::new("contracts", Options::default()),
            ColumnFamilyDescriptor::new("fee_records", Options::default()),
            ColumnFamilyDescriptor::new("cache", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }
}

impl BlockStore for RocksBlockStore {
    fn get_block(&self, number: u64) -> Result<Option<BlockRecord>> {
        let cf = self.get_cf("blocks")?;
        let key = encode_block_key(number);
        match self.db.get_cf(cf, &key).context("Failed to get block")? {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize block record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put_block(&self, block: &BlockRecord, fees: &ContractFeesRecord) -> Result<()> {
        let blocks_cf = self.get_cf("blocks")?;
        let hashes_cf = self.get_cf("block_hashes")?;
        let fees_cf = self.get_cf("contract_fees")?;

        let block_bytes =
            postcard::to_allocvec(block).context("Failed to serialize block record")?;
        let fees_bytes =
            postcard::to_allocvec(fees).context("Failed to serialize contract fees")?;

        let mut batch = WriteBatch::default();
        batch.put_cf(blocks_cf, encode_block_key(block.number), &block_bytes);
        batch.put_cf(
            hashes_cf,
            encode_block_hash_key(block.hash),
            block.number.to_be_bytes(),
        );
        batch.put_cf(fees_cf, encode_contract_fees_key(block.number), &fees_bytes);
        self.db.write(batch).context("Failed to write block batch")?;
        Ok(())
    }

    fn delete_block(&self, number: u64) -> Result<()> {
        // Fetch the row first so the hash index entry can be removed too.
        let block = self.get_block(number)?;

        let blocks_cf = self.get_cf("blocks")?;
        let hashes_cf = self.get_cf("block_hashes")?;
        let fees_cf = self.get_cf("contract_fees")?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(blocks_cf, encode_block_key(number));
        batch.delete_cf(fees_cf, encode_contract_fees_key(number));
        if let Some(block) = block {
            batch.delete_cf(hashes_cf, encode_block_hash_key(block.hash));
        }
        self.db
            .write(batch)
            .context("Failed to write delete batch")?;
        Ok(())
    }

    fn block_hash_known(&self, hash: B256) -> Result<bool> {
        let cf = self.get_cf("block_hashes")?;
        let key = encode_block_hash_key(hash);
        Ok(self
            .db
            .get_cf(cf, &key)
            .context("Failed to get block hash")?
            .is_some())
    }

    fn tip(&self) -> Result<Option<u64>> {
        let cf = self.get_cf("blocks")?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(entry) => {
                let (key, _) = entry.context("Failed to iterate blocks")?;
                Ok(Some(decode_block_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn get_blocks_in_range(&self, from: u64, to: u64) -> Result<Vec<BlockRecord>> {
        let cf = self.get_cf("blocks")?;
        let start = encode_block_key(from);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut blocks = Vec::new();
        for entry in iter {
            let (key, value) = entry.context("Failed to iterate blocks")?;
            let number = decode_block_key(&key)?;
            if number > to {
                break;
            }
            let record =
                postcard::from_bytes(&value).context("Failed to deserialize block record")?;
            blocks.push(record);
        }
        Ok(blocks)
    }

    fn get_contract_fees_in_range(&self, from: u64, to: u64) -> Result<ContractFeeSums> {
        // USD conversion needs each block's price, fetched alongside.
        let prices: HashMap<u64, f64> = self
            .get_blocks_in_range(from, to)?
            .into_iter()
            .map(|block| (block.number, block.eth_price))
            .collect();

        let cf = self.get_cf("contract_fees")?;
        let start = encode_contract_fees_key(from);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut sums = ContractFeeSums::default();
        for entry in iter {
            let (key, value) = entry.context("Failed to iterate contract fees")?;
            let number = decode_contract_fees_key(&key)?;
            if number > to {
                break;
            }
            let fees: ContractFeesRecord =
                postcard::from_bytes(&value).context("Failed to deserialize contract fees")?;
            let price = prices.get(&number).copied().unwrap_or(0.0);
            for (address, fee) in fees.fees {
                let eth = sums.eth.entry(address).or_default();
                *eth = eth.saturating_add(fee);
                let usd = sums.usd.entry(address).or_default();
                *usd = usd.saturating_add(crate::fee::wei_to_usd_cents(fee, price));
            }
        }
        Ok(sums)
    }

    fn get_contract_fees(&self, number: u64) -> Result<Option<ContractFeesRecord>> {
        let cf = self.get_cf("contract_fees")?;
        let key = encode_contract_fees_key(number);
        match self
            .db
            .get_cf(cf, &key)
            .context("Failed to get contract fees")?
        {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize contract fees")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn upsert_contract_addresses(&self, addresses: &[Address]) -> Result<()> {
        let cf = self.get_cf("contracts")?;
        let mut batch = WriteBatch::default();
        for &address in addresses {
            let key = encode_contract_key(address);
            let exists = self
                .db
                .get_cf(cf, &key)
                .context("Failed to get contract meta")?
                .is_some();
            if !exists {
                let empty = postcard::to_allocvec(&ContractMetaRecord::default())
                    .context("Failed to serialize contract meta")?;
                batch.put_cf(cf, &key, &empty);
            }
        }
        self.db
            .write(batch)
            .context("Failed to write contract batch")?;
        Ok(())
    }

    fn get_contract_meta(&self, address: Address) -> Result<Option<ContractMetaRecord>> {
        let cf = self.get_cf("contracts")?;
        let key = encode_contract_key(address);
        match self
            .db
            .get_cf(cf, &key)
            .context("Failed to get contract meta")?
        {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize contract meta")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put_contract_meta(&self, address: Address, meta: &ContractMetaRecord) -> Result<()> {
        let cf = self.get_cf("contracts")?;
        let key = encode_contract_key(address);
        let value = postcard::to_allocvec(meta).context("Failed to serialize contract meta")?;
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put contract meta")?;
        Ok(())
    }

    fn put_fee_records(
        &self,
        granularity: Granularity,
        sorting: Sorting,
        denomination: Denomination,
        records: &[FeeRecord],
    ) -> Result<()> {
        let cf = self.get_cf("fee_records")?;
        let key = encode_fee_record_key(granularity, sorting, denomination);
        let value = postcard::to_allocvec(records).context("Failed to serialize fee records")?;
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put fee records")?;
        Ok(())
    }

    fn get_fee_records(
        &self,
        granularity: Granularity,
        sorting: Sorting,
        denomination: Denomination,
    ) -> Result<Vec<FeeRecord>> {
        let cf = self.get_cf("fee_records")?;
        let key = encode_fee_record_key(granularity, sorting, denomination);
        match self
            .db
            .get_cf(cf, &key)
            .context("Failed to get fee records")?
        {
            Some(bytes) => {
                postcard::from_bytes(&bytes).context("Failed to deserialize fee records")
            }
            None => Ok(Vec::new()),
        }
    }

    fn put_cache_value(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let cf = self.get_cf("cache")?;
        let bytes = serde_json::to_vec(value).context("Failed to serialize cache value")?;
        self.db
            .put_cf(cf, encode_cache_key(key), &bytes)
            .context("Failed to put cache value")?;
        Ok(())
    }

    fn get_cache_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let cf = self.get_cf("cache")?;
        match self
            .db
            .get_cf(cf, encode_cache_key(key))
            .context("Failed to get cache value")?
        {
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).context("Failed to parse cache value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, B256};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, RocksBlockStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksBlockStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn block(number: u64) -> BlockRecord {
        BlockRecord {
            number,
            hash: B256::with_last_byte(number as u8),
            parent_hash: B256::with_last_byte(number.saturating_sub(1) as u8),
            mined_at: 1_700_000_000 + number * 12,
            gas_used: 10_000_000,
            base_fee_per_gas: U256::from(100u64),
            eth_price: 2000.0,
            transfers_fee: U256::from(number * 10),
            contract_creation_fee: U256::from(number * 5),
            tips: U256::from(number),
        }
    }

    fn fees(pairs: &[(Address, u64)]) -> ContractFeesRecord {
        ContractFeesRecord {
            fees: pairs
                .iter()
                .map(|(address, fee)| (*address, U256::from(*fee)))
                .collect(),
        }
    }

    #[test]
    fn test_put_get_delete_block() {
        let (_dir, store) = open_store();
        let b = block(7);
        store.put_block(&b, &ContractFeesRecord::default()).unwrap();

        assert_eq!(store.get_block(7).unwrap(), Some(b.clone()));
        assert!(store.block_hash_known(b.hash).unwrap());
        assert_eq!(store.tip().unwrap(), Some(7));

        store.delete_block(7).unwrap();
        assert_eq!(store.get_block(7).unwrap(), None);
        assert!(!store.block_hash_known(b.hash).unwrap());
        assert_eq!(store.tip().unwrap(), None);
    }

    #[test]
    fn test_tip_is_newest_block() {
        let (_dir, store) = open_store();
        for number in [3, 1, 2] {
            store
                .put_block(&block(number), &ContractFeesRecord::default())
                .unwrap();
        }
        assert_eq!(store.tip().unwrap(), Some(3));
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let (_dir, store) = open_store();
        for number in 1..=5 {
            store
                .put_block(&block(number), &ContractFeesRecord::default())
                .unwrap();
        }
        let blocks = store.get_blocks_in_range(2, 4).unwrap();
        let numbers: Vec<u64> = blocks.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_contract_fees_in_range_sums_per_address() {
        let (_dir, store) = open_store();
        let a = address!("00000000000000000000000000000000000000aa");
        let b = address!("00000000000000000000000000000000000000bb");

        store.put_block(&block(1), &fees(&[(a, 100)])).unwrap();
        store.put_block(&block(2), &fees(&[(a, 50), (b, 30)])).unwrap();
        store.put_block(&block(3), &fees(&[(b, 70)])).unwrap();

        let sums = store.get_contract_fees_in_range(1, 2).unwrap();
        assert_eq!(sums.eth.get(&a), Some(&U256::from(150u64)));
        assert_eq!(sums.eth.get(&b), Some(&U256::from(30u64)));

        let all = store.get_contract_fees_in_range(1, 3).unwrap();
        assert_eq!(all.eth.get(&b), Some(&U256::from(100u64)));
    }

    #[test]
    fn test_upsert_contracts_preserves_existing_meta() {
        let (_dir, store) = open_store();
        let a = address!("00000000000000000000000000000000000000aa");

        let named = ContractMetaRecord {
            name: Some("Uniswap".to_string()),
            ..Default::default()
        };
        store.put_contract_meta(a, &named).unwrap();

        // Re-registering must not clobber the enriched row.
        store.upsert_contract_addresses(&[a]).unwrap();
        assert_eq!(store.get_contract_meta(a).unwrap(), Some(named));

        let b = address!("00000000000000000000000000000000000000bb");
        store.upsert_contract_addresses(&[b]).unwrap();
        assert_eq!(
            store.get_contract_meta(b).unwrap(),
            Some(ContractMetaRecord::default())
        );
    }

    #[test]
    fn test_fee_records_roundtrip() {
        let (_dir, store) = open_store();
        let records = vec![FeeRecord {
            first_block: 1,
            last_block: 2,
            fee_sum: U256::from(10u64),
        }];
        store
            .put_fee_records(Granularity::M5, Sorting::Max, Denomination::Eth, &records)
            .unwrap();
        assert_eq!(
            store
                .get_fee_records(Granularity::M5, Sorting::Max, Denomination::Eth)
                .unwrap(),
            records
        );
        // Other tables stay empty
        assert!(store
            .get_fee_records(Granularity::M5, Sorting::Min, Denomination::Eth)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cache_value_roundtrip() {
        let (_dir, store) = open_store();
        let value = serde_json::json!({ "number": 42, "burn_rate": 1.5 });
        store.put_cache_value("derived-stats", &value).unwrap();
        assert_eq!(store.get_cache_value("derived-stats").unwrap(), Some(value));
        assert_eq!(store.get_cache_value("missing").unwrap(), None);
    }
}
