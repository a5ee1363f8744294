//! Cluster and sharding module
//!
//! This module implements the sharding logic for distributing keys across multiple
//! shards, each running in its own thread. The manager routes every command by
//! its [`KeySpec`], fans multi-key commands out and merges the partial replies.

mod router;
mod shard;

pub use router::ShardRouter;
pub use shard::{Shard, ShardConfig, ShardFailure, ShardRequest};

use crate::commands::{CommandRegistry, Gather, KeySpec};
use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::events::EventPublisher;
use crate::protocol::RespValue;
use crate::store::Object;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns all shards and routes commands to them
pub struct ShardManager {
    shards: Vec<Shard>,
    router: ShardRouter,
    registry: CommandRegistry,
    shutdown: CancellationToken,
}

impl ShardManager {
    /// Start one shard per configured slot plus the supervisor task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config, publisher: EventPublisher) -> anyhow::Result<Self> {
        let num_shards = config.shard_count();
        info!("Initializing cluster with {} shards", num_shards);

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut shards = Vec::with_capacity(num_shards);
        for shard_id in 0..num_shards {
            let shard = Shard::spawn(config.shard_config(shard_id), publisher.clone(), failure_tx.clone())?;
            shards.push(shard);
        }
        drop(failure_tx);

        tokio::spawn(supervise(failure_rx, shutdown.clone()));

        info!("Cluster initialized with {} shards", num_shards);

        Ok(ShardManager {
            shards,
            router: ShardRouter::new(num_shards),
            registry: CommandRegistry::new(),
            shutdown,
        })
    }

    /// Execute a command, fanning it out when its keys span shards
    pub async fn execute(&self, name: &str, args: Vec<Bytes>) -> DbResult<RespValue> {
        let command = self.registry.resolve(name, args.len())?;

        match command.key_spec() {
            KeySpec::None => self.call(0, name, args).await,

            KeySpec::Single => {
                let shard_id = args.first().map_or(0, |key| self.router.route_key(key));
                self.call(shard_id, name, args).await
            }

            KeySpec::Colocated(n) => {
                let keys = &args[..n.min(args.len())];
                let shard_id = keys.first().map_or(0, |key| self.router.route_key(key));
                if keys.iter().any(|key| self.router.route_key(key) != shard_id) {
                    return Err(DbError::CrossShard);
                }
                self.call(shard_id, name, args).await
            }

            KeySpec::Each(gather) => {
                let groups = self.router.group_by_shard(args.iter());
                if groups.len() == 1 {
                    return self.call(groups[0].0, name, args).await;
                }

                let mut pending = Vec::with_capacity(groups.len());
                for (shard_id, positions) in groups {
                    let part = positions.iter().map(|&p| args[p].clone()).collect();
                    pending.push((positions, self.dispatch(shard_id, name, part)?));
                }
                gather_replies(gather, args.len(), await_replies(pending).await?)
            }

            KeySpec::Pairs => {
                if args.len() % 2 != 0 {
                    return Err(DbError::WrongArity(command.name().to_string()));
                }
                let groups = self.router.group_by_shard(args.iter().step_by(2));

                let mut pending = Vec::with_capacity(groups.len());
                for (shard_id, pairs) in groups {
                    let part = pairs
                        .iter()
                        .flat_map(|&p| [args[2 * p].clone(), args[2 * p + 1].clone()])
                        .collect();
                    pending.push((pairs, self.dispatch(shard_id, name, part)?));
                }
                gather_replies(Gather::AllOk, args.len() / 2, await_replies(pending).await?)
            }

            KeySpec::All(gather) => {
                let mut pending = Vec::with_capacity(self.shards.len());
                for shard_id in 0..self.shards.len() {
                    pending.push((Vec::new(), self.dispatch(shard_id, name, args.clone())?));
                }
                gather_replies(gather, 0, await_replies(pending).await?)
            }
        }
    }

    /// Snapshot live entries across every shard, optionally narrowed by a glob
    pub async fn scan(&self, pattern: Option<Bytes>) -> DbResult<Vec<(Bytes, Object)>> {
        let mut pending = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (reply, rx) = oneshot::channel();
            shard
                .send(ShardRequest::Scan { pattern: pattern.clone(), reply })
                .map_err(|_| DbError::ShardUnavailable(shard.id()))?;
            pending.push((shard.id(), rx));
        }

        let mut entries = Vec::new();
        for (shard_id, rx) in pending {
            entries.extend(rx.await.map_err(|_| DbError::ShardUnavailable(shard_id))?);
        }
        Ok(entries)
    }

    /// Execute on one shard and wait for its reply
    async fn call(&self, shard_id: usize, name: &str, args: Vec<Bytes>) -> DbResult<RespValue> {
        let pending = self.dispatch(shard_id, name, args)?;
        pending.rx.await.map_err(|_| DbError::ShardUnavailable(shard_id))?
    }

    /// Queue a command on one shard, returning the reply receiver
    fn dispatch(&self, shard_id: usize, name: &str, args: Vec<Bytes>) -> DbResult<PendingReply> {
        let (reply, rx) = oneshot::channel();
        let request = ShardRequest::Command { name: name.to_string(), args, reply };
        if let Err(e) = self.shards[shard_id].send(request) {
            error!("Failed to send command to shard {}: {}", shard_id, e);
            return Err(DbError::ShardUnavailable(shard_id));
        }
        Ok(PendingReply { shard_id, rx })
    }

    /// Token cancelled when a shard dies
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Get number of shards
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }
}

struct PendingReply {
    shard_id: usize,
    rx: oneshot::Receiver<DbResult<RespValue>>,
}

/// Wait for every partial reply; the first error wins
async fn await_replies(pending: Vec<(Vec<usize>, PendingReply)>) -> DbResult<Vec<(Vec<usize>, RespValue)>> {
    let mut replies = Vec::with_capacity(pending.len());
    let mut first_error = None;
    for (positions, PendingReply { shard_id, rx }) in pending {
        match rx.await {
            Ok(Ok(reply)) => replies.push((positions, reply)),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(_) => {
                first_error.get_or_insert(DbError::ShardUnavailable(shard_id));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(replies),
    }
}

/// Merge partial replies into the shape the unsharded command returns
///
/// `positions` of each part index into the original key list, of which
/// there are `total`.
fn gather_replies(gather: Gather, total: usize, parts: Vec<(Vec<usize>, RespValue)>) -> DbResult<RespValue> {
    match gather {
        Gather::Sum => {
            let sum = parts.iter().map(|(_, reply)| reply.as_integer().unwrap_or(0)).sum();
            Ok(RespValue::integer(sum))
        }
        Gather::Ordered => {
            let mut slots = vec![RespValue::Null; total];
            for (positions, reply) in parts {
                if let RespValue::Array(items) = reply {
                    for (position, item) in positions.into_iter().zip(items) {
                        slots[position] = item;
                    }
                }
            }
            Ok(RespValue::Array(slots))
        }
        Gather::Concat => {
            let mut items = Vec::new();
            for (_, reply) in parts {
                if let RespValue::Array(part) = reply {
                    items.extend(part);
                }
            }
            Ok(RespValue::Array(items))
        }
        Gather::AllOk => Ok(RespValue::ok()),
        Gather::Text => {
            let mut text = BytesMut::new();
            for (_, reply) in parts {
                if let Some(part) = reply.as_bulk_string() {
                    text.extend_from_slice(part);
                }
            }
            Ok(RespValue::BulkString(text.freeze()))
        }
    }
}

/// Wait for the first shard failure and raise the process-wide abort signal
async fn supervise(mut failures: mpsc::UnboundedReceiver<ShardFailure>, shutdown: CancellationToken) {
    if let Some(failure) = failures.recv().await {
        error!("Shard {} failed: {}", failure.shard_id, failure.reason);
        shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::time::Duration;

    fn manager(num_shards: usize) -> ShardManager {
        let config = Config { num_shards, ..Config::default() };
        let (publisher, _bus) = events::channel(1024, Duration::ZERO);
        ShardManager::new(&config, publisher).unwrap()
    }

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    /// Two keys owned by different shards
    fn split_keys(router: &ShardRouter) -> (String, String) {
        let first = "k0".to_string();
        let owner = router.route_key(first.as_bytes());
        let second = (1..)
            .map(|i| format!("k{}", i))
            .find(|k| router.route_key(k.as_bytes()) != owner)
            .unwrap();
        (first, second)
    }

    #[tokio::test]
    async fn test_shard_panic_cancels_shutdown_token() {
        let manager = manager(1);
        let shutdown = manager.shutdown_token();
        assert!(!shutdown.is_cancelled());

        manager.shards[0].send(ShardRequest::Crash).unwrap();
        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .expect("token not cancelled after shard panic");

        assert_eq!(
            manager.execute("GET", args(&["a"])).await,
            Err(DbError::ShardUnavailable(0))
        );
        assert_eq!(manager.scan(None).await, Err(DbError::ShardUnavailable(0)));
    }

    #[tokio::test]
    async fn test_single_key_round_trip() {
        let manager = manager(4);
        assert_eq!(manager.execute("SET", args(&["a", "1"])).await, Ok(RespValue::ok()));
        assert_eq!(manager.execute("get", args(&["a"])).await, Ok(RespValue::bulk_string("1")));
        assert_eq!(
            manager.execute("NOPE", args(&[])).await,
            Err(DbError::UnknownCommand("NOPE".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mget_keeps_argument_order_across_shards() {
        let manager = manager(4);
        let keys: Vec<String> = (0..12).map(|i| format!("key{}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            manager.execute("SET", args(&[key.as_str(), format!("v{}", i).as_str()])).await.unwrap();
        }

        let mut request: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        request.insert(3, "missing");
        let reply = manager.execute("MGET", args(&request)).await.unwrap();
        let items = reply.as_array().unwrap();
        assert_eq!(items.len(), 13);
        assert_eq!(items[0], RespValue::bulk_string("v0"));
        assert_eq!(items[3], RespValue::Null);
        assert_eq!(items[12], RespValue::bulk_string("v11"));
    }

    #[tokio::test]
    async fn test_fan_out_sums_and_broadcasts() {
        let manager = manager(4);
        manager
            .execute("MSET", args(&["a", "1", "b", "2", "c", "3", "d", "4"]))
            .await
            .unwrap();
        assert_eq!(manager.execute("DBSIZE", args(&[])).await, Ok(RespValue::integer(4)));
        assert_eq!(
            manager.execute("EXISTS", args(&["a", "b", "zz", "a"])).await,
            Ok(RespValue::integer(3))
        );
        assert_eq!(
            manager.execute("KEYS", args(&["*"])).await.unwrap().as_array().map(|k| k.len()),
            Some(4)
        );
        assert_eq!(manager.execute("DEL", args(&["a", "b", "zz"])).await, Ok(RespValue::integer(2)));
        assert_eq!(manager.execute("FLUSHDB", args(&[])).await, Ok(RespValue::ok()));
        assert_eq!(manager.execute("DBSIZE", args(&[])).await, Ok(RespValue::integer(0)));
        assert_eq!(
            manager.execute("MSET", args(&["a", "1", "b"])).await,
            Err(DbError::WrongArity("MSET".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cross_shard_rename_is_rejected_without_mutation() {
        let manager = manager(4);
        let (a, b) = split_keys(manager.router());
        manager.execute("SET", args(&[a.as_str(), "x"])).await.unwrap();

        assert_eq!(manager.execute("RENAME", args(&[a.as_str(), b.as_str()])).await, Err(DbError::CrossShard));
        assert_eq!(manager.execute("GET", args(&[a.as_str()])).await, Ok(RespValue::bulk_string("x")));
        assert_eq!(manager.execute("EXISTS", args(&[b.as_str()])).await, Ok(RespValue::integer(0)));
    }

    #[tokio::test]
    async fn test_scan_covers_every_shard() {
        let manager = manager(3);
        for i in 0..30 {
            manager.execute("SET", args(&[format!("user:{}", i).as_str(), "x"])).await.unwrap();
        }
        manager.execute("SET", args(&["other", "x"])).await.unwrap();

        assert_eq!(manager.scan(None).await.unwrap().len(), 31);
        assert_eq!(manager.scan(Some(Bytes::from("user:*"))).await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_info_joins_every_shard() {
        let manager = manager(2);
        let reply = manager.execute("INFO", args(&[])).await.unwrap();
        let text = String::from_utf8(reply.as_bulk_string().unwrap().to_vec()).unwrap();
        assert!(text.contains("# Shard 0"));
        assert!(text.contains("# Shard 1"));
    }

    #[test]
    fn test_gather_ordered_places_replies() {
        let parts = vec![
            (vec![1], RespValue::Array(vec![RespValue::bulk_string("b")])),
            (vec![0, 2], RespValue::Array(vec![RespValue::bulk_string("a"), RespValue::Null])),
        ];
        assert_eq!(
            gather_replies(Gather::Ordered, 3, parts),
            Ok(RespValue::Array(vec![
                RespValue::bulk_string("a"),
                RespValue::bulk_string("b"),
                RespValue::Null,
            ]))
        );
    }
}
