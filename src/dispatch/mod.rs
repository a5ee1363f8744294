//! Command dispatcher
//!
//! Entry point for decoded client commands. Plain commands go to the shard
//! manager; `<CMD>.WATCH`, `<CMD>.UNWATCH`, `Q.WATCH` and `Q.UNWATCH` go to
//! the watch engine. The server layer only ever talks to this module.

use crate::cluster::ShardManager;
use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::events::{self, EventPublisher};
use crate::protocol::RespValue;
use crate::watch::{ConnectionId, PushSink, WatchEngine, WatchHandle, WatchStats};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const QUERY_WATCH: &str = "Q.WATCH";
const QUERY_UNWATCH: &str = "Q.UNWATCH";

/// One client connection as seen by the dispatcher
pub struct Session {
    pub id: ConnectionId,
    /// Push frames for this connection
    pub sink: PushSink,
    /// Fingerprints unwatched since the connection last looked
    retired: Mutex<Vec<String>>,
}

impl Session {
    fn retire(&self, fingerprint: String) {
        if let Ok(mut retired) = self.retired.lock() {
            retired.push(fingerprint);
        }
    }

    /// Take the fingerprints unwatched since the last call
    ///
    /// Frames for them may still sit in the push channel, queued before the
    /// unwatch was applied; the connection discards those.
    pub fn take_retired(&self) -> Vec<String> {
        self.retired
            .lock()
            .map(|mut retired| std::mem::take(&mut *retired))
            .unwrap_or_default()
    }
}

/// Fingerprint carried by a push frame
pub fn push_fingerprint(frame: &RespValue) -> Option<&Bytes> {
    frame.as_array()?.get(1)?.as_bulk_string()
}

/// Command dispatcher
///
/// Owns the shard manager and the watch engine handle. Shared by every
/// connection behind an `Arc`; all of its state is either immutable or atomic.
pub struct Dispatcher {
    shards: Arc<ShardManager>,
    watch: WatchHandle,
    publisher: EventPublisher,
    next_connection: AtomicU64,
    started: Instant,
}

impl Dispatcher {
    /// Start shards and the watch engine
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> anyhow::Result<Arc<Self>> {
        let (publisher, events_rx) = events::channel(config.event_bus_capacity, config.event_publish_timeout());
        let shards = Arc::new(ShardManager::new(config, publisher.clone())?);
        let (watch, _engine) = WatchEngine::spawn(config.watch_config(), shards.clone(), events_rx);

        info!(
            "Dispatcher ready: {} shards, event bus capacity {}",
            shards.num_shards(),
            config.event_bus_capacity
        );

        Ok(Arc::new(Dispatcher {
            shards,
            watch,
            publisher,
            next_connection: AtomicU64::new(1),
            started: Instant::now(),
        }))
    }

    /// Register a new connection, returning it with its push receiver
    pub fn open_session(&self) -> (Session, mpsc::UnboundedReceiver<RespValue>) {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (sink, pushes) = mpsc::unbounded_channel();
        (Session { id, sink, retired: Mutex::new(Vec::new()) }, pushes)
    }

    /// Forget a connection and all of its watches
    pub fn close_session(&self, session: &Session) {
        self.watch.disconnect(session.id);
    }

    /// Dispatch a decoded RESP request
    ///
    /// Takes a RESP value (expected to be an array), extracts the command name
    /// and arguments, then routes it. Always produces a reply.
    pub async fn dispatch(&self, session: &Session, value: RespValue) -> RespValue {
        let parts = match value {
            RespValue::Array(parts) if !parts.is_empty() => parts,
            invalid => {
                let b64 = general_purpose::STANDARD.encode(format!("{:?}", invalid).as_bytes());
                error!("Invalid command format - not an array or empty. Command (B64): {}", b64);
                return RespValue::error("ERR invalid command format");
            }
        };

        let name = match &parts[0] {
            RespValue::BulkString(raw) => match std::str::from_utf8(raw) {
                Ok(name) => name.to_string(),
                Err(_) => {
                    let b64 = general_purpose::STANDARD.encode(raw);
                    error!("Invalid command name encoding. Raw bytes (B64): {}", b64);
                    return RespValue::error("ERR invalid command name encoding");
                }
            },
            RespValue::SimpleString(name) => name.clone(),
            _ => return RespValue::error("ERR command name must be a bulk string"),
        };

        let mut args = Vec::with_capacity(parts.len() - 1);
        for part in &parts[1..] {
            match part.to_arg_bytes() {
                Some(arg) => args.push(arg),
                None => return RespValue::error("ERR command arguments must be bulk strings"),
            }
        }

        debug!("Dispatching command: {}", name);

        match self.execute(session, &name, args).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_internal() {
                    error!("{} failed: {}", name, e);
                } else {
                    debug!("{} rejected: {}", name, e);
                }
                e.to_resp()
            }
        }
    }

    /// Execute a command on behalf of `session`
    pub async fn execute(&self, session: &Session, name: &str, args: Vec<Bytes>) -> DbResult<RespValue> {
        let upper = name.to_ascii_uppercase();

        match upper.as_str() {
            QUERY_WATCH => {
                let text = query_text(QUERY_WATCH, &args)?;
                self.watch.watch_query(session.id, session.sink.clone(), &text).await
            }
            QUERY_UNWATCH => {
                let text = query_text(QUERY_UNWATCH, &args)?;
                let fingerprint = self.watch.unwatch_query(session.id, &text).await?;
                session.retire(fingerprint);
                Ok(RespValue::ok())
            }
            "INFO" => self.info(args).await,
            _ => {
                if let Some(base) = upper.strip_suffix(".WATCH") {
                    return self
                        .watch
                        .watch_command(session.id, session.sink.clone(), base, args)
                        .await;
                }
                if upper.ends_with(".UNWATCH") {
                    let [fingerprint] = <[Bytes; 1]>::try_from(args).map_err(|_| DbError::WrongArity(upper.clone()))?;
                    let fingerprint = String::from_utf8_lossy(&fingerprint).into_owned();
                    self.watch.unwatch(session.id, fingerprint.clone()).await?;
                    session.retire(fingerprint);
                    return Ok(RespValue::ok());
                }
                self.shards.execute(name, args).await
            }
        }
    }

    /// INFO: server and watch sections followed by one section per shard
    async fn info(&self, args: Vec<Bytes>) -> DbResult<RespValue> {
        let shards = self.shards.execute("INFO", args).await?;
        let stats = match self.watch.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Watch stats unavailable: {}", e);
                WatchStats::default()
            }
        };

        let mut info = format!(
            "# Server\r\n\
            vigildb_version:{}\r\n\
            uptime_in_seconds:{}\r\n\
            shards:{}\r\n\
            \r\n\
            # Watch\r\n\
            command_watches:{}\r\n\
            query_watches:{}\r\n\
            subscribers:{}\r\n\
            events_processed:{}\r\n\
            events_dropped:{}\r\n\
            recomputations:{}\r\n\
            recompute_errors:{}\r\n\
            pushes:{}\r\n\
            \r\n",
            env!("CARGO_PKG_VERSION"),
            self.started.elapsed().as_secs(),
            self.shards.num_shards(),
            stats.command_watches,
            stats.query_watches,
            stats.subscribers,
            stats.events_processed,
            self.publisher.dropped(),
            stats.recomputations,
            stats.recompute_errors,
            stats.pushes,
        );
        if let Some(text) = shards.as_bulk_string() {
            info.push_str(&String::from_utf8_lossy(text));
        }
        Ok(RespValue::bulk_string(info))
    }

    /// Token cancelled when a shard dies
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shards.shutdown_token()
    }

    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }
}

/// The query of `Q.WATCH`/`Q.UNWATCH`, sent quoted or as separate words
fn query_text(command: &str, args: &[Bytes]) -> DbResult<String> {
    if args.is_empty() {
        return Err(DbError::WrongArity(command.to_string()));
    }
    let words: Vec<String> = args
        .iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    Ok(words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> RespValue {
        RespValue::array(parts.iter().map(|p| RespValue::bulk_string(p.to_string())).collect())
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Dispatcher::start(&Config { num_shards: 2, ..Config::default() }).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_set_get() {
        let dispatcher = dispatcher();
        let (session, _pushes) = dispatcher.open_session();

        let result = dispatcher.dispatch(&session, command(&["SET", "mykey", "myvalue"])).await;
        assert_eq!(result, RespValue::simple_string("OK"));

        let result = dispatcher.dispatch(&session, command(&["GET", "mykey"])).await;
        assert_eq!(result, RespValue::bulk_string(Bytes::from("myvalue")));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let dispatcher = dispatcher();
        let (session, _pushes) = dispatcher.open_session();

        let result = dispatcher.dispatch(&session, command(&["UNKNOWN"])).await;
        assert_eq!(result, RespValue::error("ERR unknown command 'UNKNOWN'"));

        let result = dispatcher.dispatch(&session, command(&["GET"])).await;
        assert_eq!(result, RespValue::error("ERR wrong number of arguments for 'GET' command"));

        let result = dispatcher.dispatch(&session, RespValue::array(vec![])).await;
        assert!(result.is_error());

        let result = dispatcher
            .dispatch(&session, RespValue::array(vec![RespValue::BulkString(Bytes::from_static(&[0xff, 0xfe]))]))
            .await;
        assert_eq!(result, RespValue::error("ERR invalid command name encoding"));

        let result = dispatcher.dispatch(&session, command(&["GET.UNWATCH"])).await;
        assert_eq!(
            result,
            RespValue::error("ERR wrong number of arguments for 'GET.UNWATCH' command")
        );

        let result = dispatcher.dispatch(&session, command(&["Q.WATCH", "SELECT"])).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_watch_and_unwatch_through_dispatch() {
        let dispatcher = dispatcher();
        let (session, mut pushes) = dispatcher.open_session();

        let frame = dispatcher.dispatch(&session, command(&["get.watch", "k"])).await;
        let parts = frame.as_array().unwrap().clone();
        assert_eq!(parts[0], RespValue::bulk_string("GET"));
        assert_eq!(parts[2], RespValue::Null);
        let fingerprint = String::from_utf8(parts[1].as_bulk_string().unwrap().to_vec()).unwrap();

        dispatcher.dispatch(&session, command(&["SET", "k", "v"])).await;
        let push = tokio::time::timeout(std::time::Duration::from_secs(2), pushes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(push.as_array().unwrap()[2], RespValue::bulk_string("v"));

        let reply = dispatcher.dispatch(&session, command(&["GET.UNWATCH", fingerprint.as_str()])).await;
        assert_eq!(reply, RespValue::ok());
        assert_eq!(session.take_retired(), vec![fingerprint.clone()]);
        assert!(session.take_retired().is_empty());

        let reply = dispatcher.dispatch(&session, command(&["GET.UNWATCH", fingerprint.as_str()])).await;
        assert!(reply.is_error());
        assert!(session.take_retired().is_empty());
    }

    #[tokio::test]
    async fn test_info_has_every_section() {
        let dispatcher = dispatcher();
        let (session, _pushes) = dispatcher.open_session();

        let reply = dispatcher.dispatch(&session, command(&["INFO"])).await;
        let text = String::from_utf8(reply.as_bulk_string().unwrap().to_vec()).unwrap();
        assert!(text.contains("# Server\r\n"));
        assert!(text.contains("shards:2\r\n"));
        assert!(text.contains("# Watch\r\n"));
        assert!(text.contains("events_dropped:0\r\n"));
        assert!(text.contains("# Shard 1\r\n"));
    }
}
