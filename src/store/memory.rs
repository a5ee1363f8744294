//! Per-shard object table
//!
//! Owned by exactly one shard and only ever touched from that shard's loop,
//! so nothing here takes a lock. Expiry deadlines live in a side table keyed
//! like the main table: keys without a TTL cost nothing extra, and removing a
//! key always removes its deadline with it.

use super::object::{idle_seconds, lru_clock, now_ms, Object};
use super::value::Value;
use crate::glob::glob_match;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

/// Type alias for our hash maps with SipHasher
type StoreMap<V> = HashMap<Bytes, V, BuildHasherDefault<SipHasher13>>;

/// Keys sampled per active expiry round
const EXPIRY_SAMPLE_SIZE: usize = 20;

/// Run another round when more than this fraction of the sample had expired
const EXPIRY_REPEAT_THRESHOLD: f64 = 0.25;

/// Rounds per active expiry cycle, so the sweep never starves the command queue
const EXPIRY_MAX_ROUNDS: usize = 3;

/// A key is still readable at its deadline and gone right after it
fn is_due(deadline: u64, now: u64) -> bool {
    deadline < now
}

/// Why the store removed a key on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Deadline passed (found on access or by the sweep)
    Expired,
    /// Chosen by the LRU approximation to get back under the key ceiling
    Evicted,
}

/// A key the store removed without a command asking for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub key: Bytes,
    pub cause: RemovalCause,
}

/// Limits applied by the store
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    /// Key count ceiling, 0 disables eviction
    pub max_keys: usize,
    /// Fraction of all keys sampled per eviction
    pub eviction_sample_ratio: f64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        StoreLimits {
            max_keys: 0,
            eviction_sample_ratio: 0.1,
        }
    }
}

/// In-memory object table with expiry side table
pub struct ObjectStore {
    /// The main storage map
    entries: StoreMap<Object>,

    /// Absolute deadlines in epoch milliseconds
    expires: StoreMap<u64>,

    /// Removals performed by expiry or eviction since the last drain
    removals: Vec<Removal>,

    limits: StoreLimits,

    expired_total: u64,
    evicted_total: u64,
}

impl ObjectStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    /// Create a store enforcing the given limits
    pub fn with_limits(limits: StoreLimits) -> Self {
        ObjectStore {
            entries: StoreMap::default(),
            expires: StoreMap::default(),
            removals: Vec::new(),
            limits,
            expired_total: 0,
            evicted_total: 0,
        }
    }

    /// Get an object, treating an expired key as absent and touching live ones
    pub fn get(&mut self, key: &[u8]) -> Option<&Object> {
        self.get_mut(key).map(|obj| &*obj)
    }

    /// Get a mutable object, treating an expired key as absent
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.expire_if_due(key, now_ms());
        let obj = self.entries.get_mut(key)?;
        obj.touch();
        Some(obj)
    }

    /// Read an object without expiry checks or touching it
    pub fn peek(&self, key: &[u8]) -> Option<&Object> {
        self.entries.get(key)
    }

    /// Check if a live key exists
    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.expire_if_due(key, now_ms());
        self.entries.contains_key(key)
    }

    /// Store a value, dropping any previous deadline
    pub fn set(&mut self, key: impl Into<Bytes>, value: Value) {
        let key = key.into();
        self.expires.remove(&key);
        self.entries.insert(key, Object::new(value));
    }

    /// Store a value, keeping the previous deadline if the key was live
    pub fn set_keep_ttl(&mut self, key: impl Into<Bytes>, value: Value) {
        let key = key.into();
        self.expire_if_due(&key, now_ms());
        match self.entries.get_mut(&key) {
            Some(obj) => {
                obj.replace(value);
                obj.touch();
            }
            None => {
                self.entries.insert(key, Object::new(value));
            }
        }
    }

    /// Delete a key and its deadline, returning the object if it was live
    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.expire_if_due(key, now_ms());
        self.expires.remove(key);
        self.entries.remove(key)
    }

    /// Attach an absolute deadline to a live key
    pub fn set_expiry(&mut self, key: &[u8], deadline_ms: u64) -> bool {
        if !self.contains(key) {
            return false;
        }
        self.expires.insert(Bytes::copy_from_slice(key), deadline_ms);
        true
    }

    /// Remove the deadline of a live key, true if there was one
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.contains(key) && self.expires.remove(key).is_some()
    }

    /// Deadline of a live key
    pub fn expiry(&mut self, key: &[u8]) -> Option<u64> {
        if !self.contains(key) {
            return None;
        }
        self.expires.get(key).copied()
    }

    /// Snapshot live entries whose key matches the glob pattern (all when None)
    pub fn scan(&mut self, pattern: Option<&[u8]>) -> Vec<(Bytes, Object)> {
        self.sweep_all_expired();
        self.entries
            .iter()
            .filter(|(key, _)| pattern.map_or(true, |p| glob_match(p, key)))
            .map(|(key, obj)| (key.clone(), obj.clone()))
            .collect()
    }

    /// Live keys matching a glob pattern
    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Bytes> {
        self.sweep_all_expired();
        self.entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    /// Remove every key, returning the removed keys
    pub fn clear(&mut self) -> Vec<Bytes> {
        self.expires.clear();
        self.entries.drain().map(|(key, _)| key).collect()
    }

    /// Number of keys in the table (expired ones not yet reclaimed included)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the removals made by expiry and eviction since the last call
    pub fn take_removals(&mut self) -> Vec<Removal> {
        std::mem::take(&mut self.removals)
    }

    /// Active expiry: sample keys carrying a deadline and drop the expired ones
    ///
    /// Repeats while more than a quarter of the sample was expired, up to
    /// `EXPIRY_MAX_ROUNDS`. Returns the number of keys removed.
    pub fn active_expire_cycle(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..EXPIRY_MAX_ROUNDS {
            if self.expires.is_empty() {
                break;
            }

            let now = now_ms();
            let mut rng = rand::thread_rng();
            let due: Vec<Bytes> = self
                .expires
                .iter()
                .choose_multiple(&mut rng, EXPIRY_SAMPLE_SIZE)
                .into_iter()
                .filter(|(_, deadline)| is_due(**deadline, now))
                .map(|(key, _)| key.clone())
                .collect();

            let removed = due.len();
            for key in due {
                self.drop_key(key, RemovalCause::Expired);
            }
            total += removed;

            if (removed as f64) < EXPIRY_SAMPLE_SIZE as f64 * EXPIRY_REPEAT_THRESHOLD {
                break;
            }
        }
        total
    }

    /// Evict keys until the table is back under its ceiling
    ///
    /// Each pass samples `eviction_sample_ratio` of all keys and removes the
    /// best victim of the sample: an already expired key if there is one,
    /// otherwise the one idle the longest. The loop is bounded by the key
    /// count, so it terminates even if nothing can be chosen.
    pub fn evict_if_needed(&mut self) -> usize {
        let max_keys = self.limits.max_keys;
        if max_keys == 0 || self.entries.len() <= max_keys {
            return 0;
        }

        let mut evicted = 0;
        let mut passes = self.entries.len();
        while self.entries.len() > max_keys && passes > 0 {
            passes -= 1;

            let now = now_ms();
            let clock = lru_clock();
            let sample_size = ((self.entries.len() as f64 * self.limits.eviction_sample_ratio).ceil()
                as usize)
                .max(1);

            let mut rng = rand::thread_rng();
            let expires = &self.expires;
            let victim = self
                .entries
                .iter()
                .choose_multiple(&mut rng, sample_size)
                .into_iter()
                .map(|(key, obj)| {
                    let expired = expires.get(key).map_or(false, |deadline| is_due(*deadline, now));
                    (key, expired, idle_seconds(obj.last_accessed(), clock))
                })
                .max_by_key(|(_, expired, idle)| (*expired, *idle))
                .map(|(key, expired, _)| (key.clone(), expired));

            match victim {
                Some((key, true)) => self.drop_key(key, RemovalCause::Expired),
                Some((key, false)) => self.drop_key(key, RemovalCause::Evicted),
                None => break,
            }
            evicted += 1;
        }
        evicted
    }

    /// Approximate memory usage of stored data in bytes
    pub fn memory_usage(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, obj)| key.len() + obj.value().memory_usage())
            .sum()
    }

    /// Get statistics about the store
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.entries.len(),
            keys_with_expiry: self.expires.len(),
            expired_total: self.expired_total,
            evicted_total: self.evicted_total,
            used_memory_bytes: self.memory_usage(),
        }
    }

    /// Passive expiry for one key, true if it was removed
    fn expire_if_due(&mut self, key: &[u8], now: u64) -> bool {
        match self.expires.get(key) {
            Some(deadline) if is_due(*deadline, now) => {
                self.drop_key(Bytes::copy_from_slice(key), RemovalCause::Expired);
                true
            }
            _ => false,
        }
    }

    fn sweep_all_expired(&mut self) {
        let now = now_ms();
        let due: Vec<Bytes> = self
            .expires
            .iter()
            .filter(|(_, deadline)| is_due(**deadline, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            self.drop_key(key, RemovalCause::Expired);
        }
    }

    fn drop_key(&mut self, key: Bytes, cause: RemovalCause) {
        self.expires.remove(&key);
        if self.entries.remove(&key).is_some() {
            match cause {
                RemovalCause::Expired => self.expired_total += 1,
                RemovalCause::Evicted => self.evicted_total += 1,
            }
            self.removals.push(Removal { key, cause });
        }
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the object store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: usize,
    pub keys_with_expiry: usize,
    pub expired_total: u64,
    pub evicted_total: u64,
    pub used_memory_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bounded(max_keys: usize, ratio: f64) -> ObjectStore {
        ObjectStore::with_limits(StoreLimits {
            max_keys,
            eviction_sample_ratio: ratio,
        })
    }

    #[test]
    fn test_basic_set_get() {
        let mut store = ObjectStore::new();
        store.set(Bytes::from("key1"), Value::string("value1"));

        let obj = store.get(b"key1").unwrap();
        assert_eq!(obj.value(), &Value::String(Bytes::from("value1")));
    }

    #[test]
    fn test_remove_drops_expiry_entry() {
        let mut store = ObjectStore::new();
        store.set(Bytes::from("key1"), Value::string("value1"));
        assert!(store.set_expiry(b"key1", now_ms() + 60_000));
        assert_eq!(store.stats().keys_with_expiry, 1);

        assert!(store.remove(b"key1").is_some());
        assert_eq!(store.stats().keys_with_expiry, 0);
        assert!(!store.contains(b"key1"));
    }

    #[test]
    fn test_set_clears_ttl_but_keep_ttl_does_not() {
        let mut store = ObjectStore::new();
        let deadline = now_ms() + 60_000;
        store.set(Bytes::from("k"), Value::string("a"));
        store.set_expiry(b"k", deadline);

        store.set_keep_ttl(Bytes::from("k"), Value::string("b"));
        assert_eq!(store.expiry(b"k"), Some(deadline));

        store.set(Bytes::from("k"), Value::string("c"));
        assert_eq!(store.expiry(b"k"), None);
    }

    #[test]
    fn test_passive_expiry_removes_object_and_deadline() {
        let mut store = ObjectStore::new();
        store.set(Bytes::from("temp"), Value::string("gone"));
        store.set_expiry(b"temp", now_ms() + 5);
        assert!(store.get(b"temp").is_some());

        std::thread::sleep(Duration::from_millis(20));

        assert!(store.get(b"temp").is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().keys_with_expiry, 0);
        assert_eq!(
            store.take_removals(),
            vec![Removal { key: Bytes::from("temp"), cause: RemovalCause::Expired }]
        );
    }

    #[test]
    fn test_key_readable_until_its_deadline() {
        let mut store = ObjectStore::new();
        store.set(Bytes::from("k"), Value::string("v"));
        let deadline = now_ms() + 60_000;
        store.set_expiry(b"k", deadline);

        assert!(!store.expire_if_due(b"k", deadline - 1));
        assert!(!store.expire_if_due(b"k", deadline));
        assert!(store.contains(b"k"));

        assert!(store.expire_if_due(b"k", deadline + 1));
        assert!(!store.contains(b"k"));
        assert_eq!(store.stats().keys_with_expiry, 0);
    }

    #[test]
    fn test_active_expiry_reclaims_unread_keys() {
        let mut store = ObjectStore::new();
        for i in 0..10 {
            let key = Bytes::from(format!("temp:{}", i));
            store.set(key.clone(), Value::string("x"));
            store.set_expiry(&key, now_ms() + 5);
        }
        for i in 0..5 {
            store.set(Bytes::from(format!("keep:{}", i)), Value::string("y"));
        }

        std::thread::sleep(Duration::from_millis(20));

        let removed = store.active_expire_cycle();
        assert_eq!(removed, 10);
        assert_eq!(store.len(), 5);
        assert_eq!(store.take_removals().len(), 10);
    }

    #[test]
    fn test_active_expiry_leaves_live_keys() {
        let mut store = ObjectStore::new();
        for i in 0..10 {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key.clone(), Value::string("x"));
            store.set_expiry(&key, now_ms() + 3_600_000);
        }
        assert_eq!(store.active_expire_cycle(), 0);
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_eviction_returns_under_ceiling() {
        let mut store = bounded(10, 0.5);
        for i in 0..15 {
            store.set(Bytes::from(format!("key:{}", i)), Value::string("v"));
        }
        let evicted = store.evict_if_needed();
        assert_eq!(evicted, 5);
        assert_eq!(store.len(), 10);
        assert_eq!(store.stats().evicted_total, 5);
    }

    #[test]
    fn test_eviction_prefers_idle_keys_with_full_sample() {
        let mut store = bounded(3, 1.0);
        for i in 0..4 {
            store.set(Bytes::from(format!("key:{}", i)), Value::string("v"));
        }
        let clock = lru_clock();
        for i in 0..4 {
            let key = format!("key:{}", i);
            let obj = store.entries.get_mut(key.as_bytes()).unwrap();
            obj.set_last_accessed(if i == 2 { clock.wrapping_sub(500) } else { clock });
        }

        assert_eq!(store.evict_if_needed(), 1);
        assert!(store.peek(b"key:2").is_none());
        assert_eq!(
            store.take_removals(),
            vec![Removal { key: Bytes::from("key:2"), cause: RemovalCause::Evicted }]
        );
    }

    #[test]
    fn test_unbounded_store_never_evicts() {
        let mut store = ObjectStore::new();
        for i in 0..100 {
            store.set(Bytes::from(format!("key:{}", i)), Value::string("v"));
        }
        assert_eq!(store.evict_if_needed(), 0);
    }

    #[test]
    fn test_scan_filters_by_pattern() {
        let mut store = ObjectStore::new();
        store.set(Bytes::from("user:1"), Value::string("a"));
        store.set(Bytes::from("user:2"), Value::string("b"));
        store.set(Bytes::from("session:1"), Value::string("c"));

        assert_eq!(store.scan(Some(b"user:*")).len(), 2);
        assert_eq!(store.scan(None).len(), 3);
        assert_eq!(store.keys(b"*:1").len(), 2);
    }
}
