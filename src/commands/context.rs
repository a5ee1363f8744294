//! Command execution context

use crate::events::MutationOp;
use crate::store::ObjectStore;
use bytes::Bytes;

/// A state change recorded by a command, turned into an event after commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub key: Bytes,
    pub op: MutationOp,
}

/// Context provided to commands during execution
///
/// This context gives commands access to the shard's store and collects the
/// state changes they make. Keeps coupling loose by providing a clean interface:
/// commands never see the event bus.
pub struct CommandContext {
    /// The shard's object store
    pub store: ObjectStore,

    /// Shard owning the store
    pub shard_id: usize,

    marks: Vec<Mark>,
}

impl CommandContext {
    /// Create a new command context with an unbounded store
    pub fn new() -> Self {
        Self::with_store(ObjectStore::new(), 0)
    }

    /// Create a context around an existing store
    pub fn with_store(store: ObjectStore, shard_id: usize) -> Self {
        CommandContext {
            store,
            shard_id,
            marks: Vec::new(),
        }
    }

    /// Record a state change on `key`
    pub fn mark(&mut self, key: Bytes, op: MutationOp) {
        self.marks.push(Mark { key, op });
    }

    /// Record a write: `Set` if the key still exists, `Del` if the write removed it
    pub fn mark_write(&mut self, key: Bytes) {
        let op = if self.store.peek(&key).is_some() {
            MutationOp::Set
        } else {
            MutationOp::Del
        };
        self.mark(key, op);
    }

    /// Take the marks recorded since the last call
    pub fn take_marks(&mut self) -> Vec<Mark> {
        std::mem::take(&mut self.marks)
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}
