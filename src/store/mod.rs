//! In-memory storage module
//!
//! Provides the objects stored under each key and the per-shard table that
//! owns them, including expiry and eviction. This module is independent of
//! protocol and command handling (loose coupling).

mod value;
mod object;
mod memory;

pub use value::{parse_canonical_int, Score, SortedSet, Value};
pub use object::{now_ms, Object, ValueMut};
pub use memory::{ObjectStore, Removal, RemovalCause, StoreLimits, StoreStats};
