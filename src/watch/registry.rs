//! Subscription registry
//!
//! Owned by the watch engine task and never shared. Subscriptions are keyed by
//! fingerprint; command watches are also indexed by the keys they read, so a
//! mutation finds its subscriptions without scanning all of them.

use crate::events::MutationEvent;
use crate::protocol::RespValue;
use crate::query::Query;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies a client connection
pub type ConnectionId = u64;

/// Where push frames for one connection are sent
pub type PushSink = mpsc::UnboundedSender<RespValue>;

/// What a subscription recomputes
#[derive(Debug, Clone)]
pub enum WatchSpec {
    /// A read command and the keys among its arguments
    Command {
        name: String,
        args: Vec<Bytes>,
        keys: Vec<Bytes>,
    },
    Query(Arc<Query>),
}

pub struct Subscription {
    /// First element of every push frame
    pub tag: String,
    pub spec: WatchSpec,
    pub subscribers: HashMap<ConnectionId, PushSink>,
    pub last_result: Option<RespValue>,
    /// Keys behind the rows of the last query result
    pub result_keys: HashSet<Bytes>,
}

/// Counts reported by INFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub command_watches: usize,
    pub query_watches: usize,
    pub subscribers: usize,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Subscription>,
    by_key: HashMap<Bytes, HashSet<String>>,
    queries: HashSet<String>,
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&Subscription> {
        self.entries.get(fingerprint)
    }

    pub fn get_mut(&mut self, fingerprint: &str) -> Option<&mut Subscription> {
        self.entries.get_mut(fingerprint)
    }

    /// Create an entry with no subscribers yet; an existing entry is kept
    pub fn insert(&mut self, fingerprint: String, tag: String, spec: WatchSpec) {
        if self.entries.contains_key(&fingerprint) {
            return;
        }

        match &spec {
            WatchSpec::Command { keys, .. } => {
                for key in keys {
                    self.by_key.entry(key.clone()).or_default().insert(fingerprint.clone());
                }
            }
            WatchSpec::Query(_) => {
                self.queries.insert(fingerprint.clone());
            }
        }

        self.entries.insert(
            fingerprint,
            Subscription {
                tag,
                spec,
                subscribers: HashMap::new(),
                last_result: None,
                result_keys: HashSet::new(),
            },
        );
    }

    /// Add a subscriber to an existing entry; false when there is no such entry
    pub fn add_subscriber(&mut self, fingerprint: &str, connection: ConnectionId, sink: PushSink) -> bool {
        let Some(entry) = self.entries.get_mut(fingerprint) else {
            return false;
        };
        entry.subscribers.insert(connection, sink);
        self.by_connection
            .entry(connection)
            .or_default()
            .insert(fingerprint.to_string());
        true
    }

    /// Remove a subscriber, tearing the entry down once nobody is left
    ///
    /// Returns false when the connection was not subscribed.
    pub fn remove_subscriber(&mut self, fingerprint: &str, connection: ConnectionId) -> bool {
        let removed = match self.entries.get_mut(fingerprint) {
            Some(entry) => entry.subscribers.remove(&connection).is_some(),
            None => false,
        };
        if !removed {
            return false;
        }

        if let Some(fingerprints) = self.by_connection.get_mut(&connection) {
            fingerprints.remove(fingerprint);
            if fingerprints.is_empty() {
                self.by_connection.remove(&connection);
            }
        }

        if self
            .entries
            .get(fingerprint)
            .map_or(false, |entry| entry.subscribers.is_empty())
        {
            self.teardown(fingerprint);
        }
        true
    }

    /// Drop every subscription held by a connection, returning how many
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let fingerprints = self.by_connection.remove(&connection).unwrap_or_default();
        let count = fingerprints.len();
        for fingerprint in fingerprints {
            let empty = match self.entries.get_mut(&fingerprint) {
                Some(entry) => {
                    entry.subscribers.remove(&connection);
                    entry.subscribers.is_empty()
                }
                None => false,
            };
            if empty {
                self.teardown(&fingerprint);
            }
        }
        count
    }

    fn teardown(&mut self, fingerprint: &str) {
        let Some(entry) = self.entries.remove(fingerprint) else {
            return;
        };
        match entry.spec {
            WatchSpec::Command { keys, .. } => {
                for key in keys {
                    if let Some(fingerprints) = self.by_key.get_mut(&key) {
                        fingerprints.remove(fingerprint);
                        if fingerprints.is_empty() {
                            self.by_key.remove(&key);
                        }
                    }
                }
            }
            WatchSpec::Query(_) => {
                self.queries.remove(fingerprint);
            }
        }
    }

    /// Fingerprints whose result may change because of `event`
    ///
    /// A query is affected when the key is in its scope and either the new
    /// value matches or the key was part of the last result.
    pub fn affected(&self, event: &MutationEvent) -> Vec<String> {
        let mut affected: Vec<String> = self
            .by_key
            .get(&event.key)
            .map(|fingerprints| fingerprints.iter().cloned().collect())
            .unwrap_or_default();

        for fingerprint in &self.queries {
            let Some(entry) = self.entries.get(fingerprint) else {
                continue;
            };
            let WatchSpec::Query(query) = &entry.spec else {
                continue;
            };
            if !query.in_scope(&event.key) {
                continue;
            }
            let now_matches = event
                .object
                .as_ref()
                .map_or(false, |object| query.matches(&event.key, object));
            if now_matches || entry.result_keys.contains(&event.key) {
                affected.push(fingerprint.clone());
            }
        }

        affected
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> RegistryCounts {
        let query_watches = self.queries.len();
        RegistryCounts {
            command_watches: self.entries.len() - query_watches,
            query_watches,
            subscribers: self.entries.values().map(|e| e.subscribers.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MutationOp;
    use crate::store::{Object, Value};

    fn command(key: &str) -> WatchSpec {
        WatchSpec::Command {
            name: "GET".into(),
            args: vec![Bytes::copy_from_slice(key.as_bytes())],
            keys: vec![Bytes::copy_from_slice(key.as_bytes())],
        }
    }

    fn query(text: &str) -> WatchSpec {
        WatchSpec::Query(Arc::new(Query::parse(text).unwrap()))
    }

    fn event(key: &str, value: Option<Value>) -> MutationEvent {
        MutationEvent {
            key: Bytes::copy_from_slice(key.as_bytes()),
            shard_id: 0,
            op: if value.is_some() { MutationOp::Set } else { MutationOp::Del },
            object: value.map(Object::new),
        }
    }

    fn sink() -> PushSink {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn test_shared_entry_lifecycle() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("fp".into(), "GET".into(), command("a"));
        assert!(registry.add_subscriber("fp", 1, sink()));
        assert!(registry.add_subscriber("fp", 2, sink()));
        assert_eq!(registry.counts().subscribers, 2);

        assert!(registry.remove_subscriber("fp", 1));
        assert!(!registry.remove_subscriber("fp", 1));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_subscriber("fp", 2));
        assert!(registry.is_empty());
        assert!(registry.affected(&event("a", Some(Value::string("1")))).is_empty());
        assert!(!registry.add_subscriber("fp", 3, sink()));
    }

    #[test]
    fn test_command_watches_indexed_by_key() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("fa".into(), "GET".into(), command("a"));
        registry.insert("fb".into(), "GET".into(), command("b"));
        registry.add_subscriber("fa", 1, sink());
        registry.add_subscriber("fb", 1, sink());

        assert_eq!(registry.affected(&event("a", None)), vec!["fa".to_string()]);
        assert!(registry.affected(&event("c", None)).is_empty());
    }

    #[test]
    fn test_query_affected_resolution() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("q".into(), "Q.WATCH".into(), query("SELECT $key WHERE $key LIKE 'm:*' AND $value > 3"));
        registry.add_subscriber("q", 1, sink());

        // Out of scope
        assert!(registry.affected(&event("x", Some(Value::string("10")))).is_empty());
        // In scope and matching
        assert_eq!(registry.affected(&event("m:a", Some(Value::string("10")))), vec!["q".to_string()]);
        // In scope, not matching, not in the last result
        assert!(registry.affected(&event("m:a", Some(Value::string("1")))).is_empty());
        assert!(registry.affected(&event("m:a", None)).is_empty());

        // Leaving the result is a change
        registry.get_mut("q").unwrap().result_keys.insert(Bytes::from("m:a"));
        assert_eq!(registry.affected(&event("m:a", None)), vec!["q".to_string()]);
    }

    #[test]
    fn test_remove_connection() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert("fa".into(), "GET".into(), command("a"));
        registry.insert("q".into(), "Q.WATCH".into(), query("SELECT $key"));
        registry.add_subscriber("fa", 1, sink());
        registry.add_subscriber("q", 1, sink());
        registry.add_subscriber("q", 2, sink());

        assert_eq!(registry.remove_connection(1), 2);
        assert!(registry.get("fa").is_none());
        assert_eq!(registry.get("q").map(|e| e.subscribers.len()), Some(1));
        assert_eq!(
            registry.counts(),
            RegistryCounts { command_watches: 0, query_watches: 1, subscribers: 1 }
        );
        assert_eq!(registry.remove_connection(1), 0);
    }
}
