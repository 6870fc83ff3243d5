//! Known-contract cache
//!
//! In-memory set of contract addresses that have already been
//! registered in the store, so steady-state ingestion doesn't re-upsert
//! the same rows on every block. Addresses stay cached for the process
//! lifetime; a restart simply re-registers, which the store treats as a
//! no-op.

use alloy_primitives::Address;
use std::collections::HashSet;

/// Cache of contract addresses known to exist in the store.
pub struct KnownContractsCache {
    known: HashSet<Address>,
}

impl KnownContractsCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            known: HashSet::new(),
        }
    }

    /// Filter out addresses already registered, returning only the new
    /// ones, and mark those as known.
    pub fn filter_new(&mut self, addresses: impl IntoIterator<Item = Address>) -> Vec<Address> {
        let mut fresh = Vec::new();
        for address in addresses {
            if self.known.insert(address) {
                fresh.push(address);
            }
        }
        fresh
    }

    /// Number of cached addresses.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl Default for KnownContractsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_filter_new_deduplicates() {
        let mut cache = KnownContractsCache::new();
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");

        assert_eq!(cache.filter_new([a, b]), vec![a, b]);
        // Second sighting of a, first of nothing new
        assert!(cache.filter_new([a, b]).is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut cache = KnownContractsCache::new();
        let a = address!("0000000000000000000000000000000000000001");
        assert_eq!(cache.filter_new([a, a, a]), vec![a]);
    }
}
