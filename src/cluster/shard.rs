//! Shard implementation
//!
//! Each shard runs in its own thread with a dedicated ObjectStore.
//! This provides true parallelism while maintaining single-threaded consistency
//! within each shard: commands are drained one at a time from a single queue,
//! so a read-modify-write never needs a lock.

use crate::commands::{CommandContext, CommandRegistry, Mark};
use crate::error::DbResult;
use crate::events::{EventPublisher, MutationEvent, MutationOp};
use crate::protocol::RespValue;
use crate::store::{Object, ObjectStore, Removal, RemovalCause, StoreLimits};
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Configuration for a shard
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Unique shard identifier
    pub shard_id: usize,

    /// Key ceiling and eviction sampling
    pub limits: StoreLimits,

    /// Period of the active expiry sweep
    pub active_expiry_interval: Duration,
}

/// A request sent to a shard
pub enum ShardRequest {
    /// Execute a registered command against this shard's keys
    Command {
        name: String,
        args: Vec<Bytes>,
        reply: oneshot::Sender<DbResult<RespValue>>,
    },

    /// Snapshot the live entries whose key matches the pattern
    Scan {
        pattern: Option<Bytes>,
        reply: oneshot::Sender<Vec<(Bytes, Object)>>,
    },

    /// Make the shard loop panic
    #[cfg(test)]
    Crash,
}

/// Report sent to the manager when a shard thread dies
#[derive(Debug, Clone)]
pub struct ShardFailure {
    pub shard_id: usize,
    pub reason: String,
}

/// A shard that processes requests in its own thread
pub struct Shard {
    /// Shard ID
    id: usize,

    /// Channel to send requests to the shard thread
    request_tx: mpsc::UnboundedSender<ShardRequest>,
}

impl Shard {
    /// Create a new shard and start its thread
    ///
    /// A panic or a failed start inside the thread is reported on `failures`.
    pub fn spawn(
        config: ShardConfig,
        publisher: EventPublisher,
        failures: mpsc::UnboundedSender<ShardFailure>,
    ) -> anyhow::Result<Self> {
        let shard_id = config.shard_id;
        info!("Initializing shard {}", shard_id);

        let (request_tx, request_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name(format!("shard-{}", shard_id))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = failures.send(ShardFailure {
                            shard_id,
                            reason: format!("failed to create shard runtime: {}", e),
                        });
                        return;
                    }
                };

                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(Self::run_shard_loop(config, request_rx, publisher))
                }));

                if let Err(panic) = outcome {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    let _ = failures.send(ShardFailure { shard_id, reason });
                }
            })?;

        info!("Shard {} started", shard_id);

        Ok(Shard { id: shard_id, request_tx })
    }

    /// Send a request to this shard
    pub fn send(&self, request: ShardRequest) -> anyhow::Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| anyhow::anyhow!("Shard {} channel closed", self.id))
    }

    /// The main loop that runs in the shard's thread
    async fn run_shard_loop(
        config: ShardConfig,
        mut request_rx: mpsc::UnboundedReceiver<ShardRequest>,
        publisher: EventPublisher,
    ) {
        let shard_id = config.shard_id;
        info!("Shard {} loop starting", shard_id);

        let mut context = CommandContext::with_store(ObjectStore::with_limits(config.limits), shard_id);
        let registry = CommandRegistry::new();

        let mut expiry_tick = tokio::time::interval(config.active_expiry_interval);
        expiry_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Main event loop
        loop {
            tokio::select! {
                request = request_rx.recv() => match request {
                    Some(ShardRequest::Command { name, args, reply }) => {
                        trace!("Shard {} executing {}", shard_id, name);
                        let (result, events) = Self::execute(&registry, &mut context, &name, &args);
                        let _ = reply.send(result);
                        for event in events {
                            publisher.publish(event).await;
                        }
                    }
                    Some(ShardRequest::Scan { pattern, reply }) => {
                        let entries = context.store.scan(pattern.as_deref());
                        let _ = reply.send(entries);
                        Self::publish_removals(&mut context, &publisher).await;
                    }
                    #[cfg(test)]
                    Some(ShardRequest::Crash) => panic!("shard {} crash requested", shard_id),
                    // Channel closed, exit
                    None => {
                        info!("Shard {} shutting down", shard_id);
                        break;
                    }
                },

                _ = expiry_tick.tick() => {
                    let removed = context.store.active_expire_cycle();
                    if removed > 0 {
                        debug!("Shard {} expired {} keys", shard_id, removed);
                    }
                    Self::publish_removals(&mut context, &publisher).await;
                }
            }
        }
    }

    /// Execute one command and collect the events it produced, in commit order
    ///
    /// Removals made by passive expiry come first, then the command's own
    /// changes (only if it succeeded), then any eviction it triggered.
    fn execute(
        registry: &CommandRegistry,
        context: &mut CommandContext,
        name: &str,
        args: &[Bytes],
    ) -> (DbResult<RespValue>, Vec<MutationEvent>) {
        let result = registry
            .resolve(name, args.len())
            .and_then(|command| command.execute(context, args));

        let marks = context.take_marks();
        let shard_id = context.shard_id;
        let mut events = removal_events(shard_id, context.store.take_removals());

        if result.is_ok() {
            events.extend(marks.into_iter().map(|Mark { key, op }| MutationEvent {
                object: context.store.peek(&key).cloned(),
                key,
                shard_id,
                op,
            }));

            if context.store.evict_if_needed() > 0 {
                events.extend(removal_events(shard_id, context.store.take_removals()));
            }
        }

        (result, events)
    }

    async fn publish_removals(context: &mut CommandContext, publisher: &EventPublisher) {
        for event in removal_events(context.shard_id, context.store.take_removals()) {
            publisher.publish(event).await;
        }
    }

    /// Get shard ID
    pub fn id(&self) -> usize {
        self.id
    }
}

fn removal_events(shard_id: usize, removals: Vec<Removal>) -> Vec<MutationEvent> {
    removals
        .into_iter()
        .map(|Removal { key, cause }| MutationEvent {
            key,
            shard_id,
            op: match cause {
                RemovalCause::Expired => MutationOp::Expired,
                RemovalCause::Evicted => MutationOp::Evict,
            },
            object: None,
        })
        .collect()
}

impl Drop for Shard {
    fn drop(&mut self) {
        debug!("Shard {} dropped", self.id);
    }
}
