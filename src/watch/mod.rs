//! Watch engine
//!
//! A single task owns the [`SubscriptionRegistry`]. It consumes two channels:
//! control messages (subscribe, unsubscribe, disconnect, stats) coming from
//! connections through a [`WatchHandle`], and mutation events coming from the
//! shards. Control messages are served first so a subscription registered
//! before a write is seen by that write's event.
//!
//! For every drained batch of events the engine recomputes each affected
//! fingerprint once, through the shard manager, and pushes
//! `[tag, fingerprint, result]` to the subscribers when the result changed.

mod fingerprint;
mod registry;

pub use fingerprint::{command_fingerprint, query_fingerprint};
pub use registry::{ConnectionId, PushSink, RegistryCounts, SubscriptionRegistry, WatchSpec};

use crate::cluster::ShardManager;
use crate::commands::KeySpec;
use crate::error::{DbError, DbResult};
use crate::events::MutationEvent;
use crate::protocol::RespValue;
use crate::query::Query;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Tag of query push frames
pub const QUERY_TAG: &str = "Q.WATCH";

/// Upper bound on events coalesced into one recomputation round
const MAX_BATCH: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchConfig {
    /// Push every recomputation, even when the result did not change
    pub push_unchanged_results: bool,
}

/// Engine counters reported by INFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub command_watches: usize,
    pub query_watches: usize,
    pub subscribers: usize,
    pub events_processed: u64,
    pub recomputations: u64,
    pub recompute_errors: u64,
    pub pushes: u64,
}

enum WatchRequest {
    Command { name: String, args: Vec<Bytes> },
    Query(Query),
}

enum Control {
    Subscribe {
        connection: ConnectionId,
        sink: PushSink,
        request: WatchRequest,
        reply: oneshot::Sender<DbResult<RespValue>>,
    },
    Unsubscribe {
        connection: ConnectionId,
        fingerprint: String,
        reply: oneshot::Sender<DbResult<()>>,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<WatchStats>,
    },
}

/// Build the frame used both as subscribe reply and as push
pub fn push_frame(tag: &str, fingerprint: &str, result: RespValue) -> RespValue {
    RespValue::Array(vec![
        RespValue::bulk_string(tag.to_string()),
        RespValue::bulk_string(fingerprint.to_string()),
        result,
    ])
}

/// Cloneable front end of the engine task
#[derive(Clone)]
pub struct WatchHandle {
    control: mpsc::UnboundedSender<Control>,
}

impl WatchHandle {
    /// Subscribe to a read command, returning the initial frame
    pub async fn watch_command(
        &self,
        connection: ConnectionId,
        sink: PushSink,
        name: &str,
        args: Vec<Bytes>,
    ) -> DbResult<RespValue> {
        let request = WatchRequest::Command { name: name.to_string(), args };
        self.request(|reply| Control::Subscribe { connection, sink, request, reply })
            .await?
    }

    /// Subscribe to a query, returning the initial frame
    pub async fn watch_query(&self, connection: ConnectionId, sink: PushSink, text: &str) -> DbResult<RespValue> {
        let request = WatchRequest::Query(Query::parse(text)?);
        self.request(|reply| Control::Subscribe { connection, sink, request, reply })
            .await?
    }

    /// Remove this connection from the subscription `fingerprint`
    pub async fn unwatch(&self, connection: ConnectionId, fingerprint: String) -> DbResult<()> {
        self.request(|reply| Control::Unsubscribe { connection, fingerprint, reply })
            .await?
    }

    /// Remove this connection from the subscription of the query `text`,
    /// returning the query's fingerprint
    pub async fn unwatch_query(&self, connection: ConnectionId, text: &str) -> DbResult<String> {
        let fingerprint = query_fingerprint(&Query::parse(text)?);
        self.unwatch(connection, fingerprint.clone()).await?;
        Ok(fingerprint)
    }

    /// Drop every subscription of a closed connection
    pub fn disconnect(&self, connection: ConnectionId) {
        let _ = self.control.send(Control::Disconnect { connection });
    }

    pub async fn stats(&self) -> DbResult<WatchStats> {
        self.request(|reply| Control::Stats { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Control) -> DbResult<T> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(make(reply))
            .map_err(|_| DbError::WatchUnavailable)?;
        rx.await.map_err(|_| DbError::WatchUnavailable)
    }
}

/// A freshly computed result
struct Computed {
    result: RespValue,
    /// Row keys, for query watches
    keys: Option<HashSet<Bytes>>,
}

pub struct WatchEngine {
    config: WatchConfig,
    shards: Arc<ShardManager>,
    registry: SubscriptionRegistry,
    control_rx: mpsc::UnboundedReceiver<Control>,
    events_rx: mpsc::Receiver<MutationEvent>,
    stats: WatchStats,
}

impl WatchEngine {
    /// Start the engine task
    pub fn spawn(
        config: WatchConfig,
        shards: Arc<ShardManager>,
        events_rx: mpsc::Receiver<MutationEvent>,
    ) -> (WatchHandle, JoinHandle<()>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let engine = WatchEngine {
            config,
            shards,
            registry: SubscriptionRegistry::new(),
            control_rx,
            events_rx,
            stats: WatchStats::default(),
        };
        let task = tokio::spawn(engine.run());
        (WatchHandle { control }, task)
    }

    async fn run(mut self) {
        info!("Watch engine started");

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(control) => self.handle_control(control).await,
                    None => break,
                },

                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        let mut batch = vec![event];
                        while batch.len() < MAX_BATCH {
                            match self.events_rx.try_recv() {
                                Ok(event) => batch.push(event),
                                Err(_) => break,
                            }
                        }
                        self.on_mutations(batch).await;
                    }
                    None => break,
                },
            }
        }

        info!("Watch engine stopped");
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Subscribe { connection, sink, request, reply } => {
                let result = self.subscribe(connection, sink, request).await;
                let _ = reply.send(result);
            }
            Control::Unsubscribe { connection, fingerprint, reply } => {
                let result = if self.registry.remove_subscriber(&fingerprint, connection) {
                    debug!("Connection {} unwatched {}", connection, fingerprint);
                    Ok(())
                } else {
                    Err(DbError::UnknownFingerprint(fingerprint))
                };
                let _ = reply.send(result);
            }
            Control::Disconnect { connection } => {
                let removed = self.registry.remove_connection(connection);
                if removed > 0 {
                    debug!("Connection {} closed, dropped {} watches", connection, removed);
                }
            }
            Control::Stats { reply } => {
                let counts = self.registry.counts();
                let _ = reply.send(WatchStats {
                    command_watches: counts.command_watches,
                    query_watches: counts.query_watches,
                    subscribers: counts.subscribers,
                    ..self.stats
                });
            }
        }
    }

    async fn subscribe(
        &mut self,
        connection: ConnectionId,
        sink: PushSink,
        request: WatchRequest,
    ) -> DbResult<RespValue> {
        let (fingerprint, tag, spec) = match request {
            WatchRequest::Command { name, args } => {
                let command = self.shards.registry().resolve(&name, args.len())?;
                if !command.watchable() {
                    return Err(DbError::NotWatchable(command.name().to_string()));
                }
                let keys = match command.key_spec() {
                    KeySpec::Each(_) => args.clone(),
                    _ => args.iter().take(1).cloned().collect(),
                };
                let tag = command.name().to_string();
                let fingerprint = command_fingerprint(&tag, &args);
                (fingerprint, tag.clone(), WatchSpec::Command { name: tag, args, keys })
            }
            WatchRequest::Query(query) => (
                query_fingerprint(&query),
                QUERY_TAG.to_string(),
                WatchSpec::Query(Arc::new(query)),
            ),
        };

        let computed = self.recompute(&spec).await?;
        let result = computed.result.clone();

        self.registry.insert(fingerprint.clone(), tag.clone(), spec);
        self.apply(&fingerprint, computed, false);
        self.registry.add_subscriber(&fingerprint, connection, sink);
        debug!("Connection {} watching {} {}", connection, tag, fingerprint);

        Ok(push_frame(&tag, &fingerprint, result))
    }

    async fn on_mutations(&mut self, batch: Vec<MutationEvent>) {
        self.stats.events_processed += batch.len() as u64;

        let mut seen = HashSet::new();
        let mut affected = Vec::new();
        for event in &batch {
            trace!("Mutation {} on shard {}", event.op.as_str(), event.shard_id);
            for fingerprint in self.registry.affected(event) {
                if seen.insert(fingerprint.clone()) {
                    affected.push(fingerprint);
                }
            }
        }

        for fingerprint in affected {
            self.refresh(&fingerprint).await;
        }
    }

    /// Recompute one subscription and push the result if it changed
    async fn refresh(&mut self, fingerprint: &str) {
        let Some(spec) = self.registry.get(fingerprint).map(|entry| entry.spec.clone()) else {
            return;
        };

        match self.recompute(&spec).await {
            Ok(computed) => self.apply(fingerprint, computed, self.config.push_unchanged_results),
            Err(e) => {
                self.stats.recompute_errors += 1;
                error!("Recomputing watch {} failed: {}", fingerprint, e);
            }
        }
    }

    /// Read the current result through the shard manager
    ///
    /// Client errors are the result a plain read would return, so they become
    /// the result; only internal errors fail the recomputation.
    async fn recompute(&mut self, spec: &WatchSpec) -> DbResult<Computed> {
        self.stats.recomputations += 1;

        match spec {
            WatchSpec::Command { name, args, .. } => {
                let result = match self.shards.execute(name, args.clone()).await {
                    Ok(reply) => reply,
                    Err(e) if e.is_internal() => return Err(e),
                    Err(e) => e.to_resp(),
                };
                Ok(Computed { result, keys: None })
            }
            WatchSpec::Query(query) => {
                let entries = self.shards.scan(query.scan_pattern()).await?;
                let evaluated = query.evaluate(entries);
                Ok(Computed {
                    result: evaluated.rows,
                    keys: Some(evaluated.keys.into_iter().collect()),
                })
            }
        }
    }

    /// Store a computed result and push it to the current subscribers
    fn apply(&mut self, fingerprint: &str, computed: Computed, push_unchanged: bool) {
        let Some(entry) = self.registry.get_mut(fingerprint) else {
            return;
        };

        if let Some(keys) = computed.keys {
            entry.result_keys = keys;
        }
        let unchanged = entry.last_result.as_ref() == Some(&computed.result);
        if unchanged && !push_unchanged {
            return;
        }

        let frame = push_frame(&entry.tag, fingerprint, computed.result.clone());
        entry.last_result = Some(computed.result);

        let mut gone = Vec::new();
        for (connection, sink) in &entry.subscribers {
            if sink.send(frame.clone()).is_ok() {
                self.stats.pushes += 1;
            } else {
                gone.push(*connection);
            }
        }

        for connection in gone {
            self.registry.remove_subscriber(fingerprint, connection);
        }
    }
}
