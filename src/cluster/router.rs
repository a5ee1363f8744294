//! Key routing logic for sharding
//!
//! Routes keys to shards using consistent hashing based on SipHash.

use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Routes keys to shards using consistent hashing
#[derive(Debug, Clone)]
pub struct ShardRouter {
    num_shards: usize,
}

impl ShardRouter {
    /// Create a new shard router
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "Number of shards must be > 0");
        ShardRouter { num_shards }
    }

    /// Route a key to a shard ID
    ///
    /// Uses SipHash13 for fast, secure hashing with good distribution.
    /// The keys are fixed for the process lifetime, so a key always lands on
    /// the same shard.
    pub fn route_key(&self, key: &[u8]) -> usize {
        let hash = self.hash_key(key);
        (hash as usize) % self.num_shards
    }

    /// Group key positions by owning shard, in shard order
    ///
    /// Returns `(shard_id, positions)` where positions index into `keys`.
    pub fn group_by_shard<'a>(&self, keys: impl Iterator<Item = &'a Bytes>) -> Vec<(usize, Vec<usize>)> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (position, key) in keys.enumerate() {
            groups.entry(self.route_key(key)).or_default().push(position);
        }
        groups.into_iter().collect()
    }

    /// Hash a key using SipHash13
    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut hasher = SipHasher13::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Get the number of shards
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }
}
