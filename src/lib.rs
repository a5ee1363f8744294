//! VigilDB - An in-memory key-value store with live watch queries
//!
//! VigilDB keeps the same layering as a plain sharded store and adds a
//! reactive layer on top:
//! - Shards own their keyspace and publish mutation events after each commit
//! - The watch engine turns those events into push frames for subscribers
//! - The dispatcher is the only entry point the server layer talks to

pub mod protocol;
pub mod store;
pub mod commands;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod glob;
pub mod query;
pub mod server;
pub mod watch;

/// Re-export commonly used types
pub use store::{Object, ObjectStore, Value};
pub use protocol::{RespValue, RespError};
pub use commands::{Command, CommandContext};
pub use cluster::{Shard, ShardManager};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{DbError, DbResult};
pub use query::Query;
pub use watch::WatchHandle;
