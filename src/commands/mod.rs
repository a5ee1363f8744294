//! Command execution module
//!
//! Provides a unified interface for all commands through the Command trait.
//! Each command family is implemented in a separate file for high cohesion.
//! Commands run inside a shard against that shard's store only; routing
//! across shards is described by each command's [`KeySpec`].

mod context;
mod registry;

// Command implementations
mod string;
mod key;
mod ttl;
mod counter;
mod list;
mod set;
mod hash;
mod zset;
mod json;
mod admin;
mod search;

pub use context::{CommandContext, Mark};
pub use registry::CommandRegistry;

use crate::error::{DbError, DbResult};
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

/// How partial replies of a fanned-out command are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gather {
    /// Integer replies are added up
    Sum,
    /// One reply element per key, put back in argument order
    Ordered,
    /// Array replies are concatenated
    Concat,
    /// OK when every shard replied OK
    AllOk,
    /// Bulk string replies are joined
    Text,
}

/// Which arguments of a command are keys, and therefore which shards run it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// No key, runs on shard 0
    None,
    /// The first argument is the only key
    Single,
    /// Every argument is a key
    Each(Gather),
    /// Arguments are key/value pairs
    Pairs,
    /// The first n arguments are keys that must live on one shard
    Colocated(usize),
    /// Runs on every shard
    All(Gather),
}

/// Command execution trait
///
/// All commands implement this trait with a single execute method.
/// This provides loose coupling between command implementations and the dispatcher.
pub trait Command: Send + Sync {
    /// Execute the command with the given context and arguments
    ///
    /// Arguments:
    /// - ctx: mutable reference to the command context (contains the shard's store)
    /// - args: command arguments (excluding the command name itself)
    ///
    /// Returns the reply, or the error to render back to the client. State
    /// changes are recorded on the context with [`CommandContext::mark`].
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue>;

    /// Get the command name (for debugging/logging)
    fn name(&self) -> &'static str;

    /// Get the minimum number of arguments required
    fn min_args(&self) -> usize {
        0
    }

    /// Get the maximum number of arguments (None = unlimited)
    fn max_args(&self) -> Option<usize> {
        None
    }

    /// Key layout used by the router
    fn key_spec(&self) -> KeySpec {
        KeySpec::Single
    }

    /// Whether `<NAME>.WATCH` may subscribe to this command
    fn watchable(&self) -> bool {
        false
    }
}

/// Parse an argument as a signed 64-bit integer
pub(crate) fn parse_int(arg: &[u8]) -> DbResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(DbError::NotInteger)
}

/// Parse an argument as a float, accepting `inf`/`-inf` but never NaN
pub(crate) fn parse_float(arg: &[u8]) -> DbResult<f64> {
    let s = std::str::from_utf8(arg).map_err(|_| DbError::NotFloat)?;
    let f = match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| DbError::NotFloat)?,
    };
    if f.is_nan() {
        return Err(DbError::NotFloat);
    }
    Ok(f)
}

/// Format a float the way Redis replies with scores
pub(crate) fn format_float(f: f64) -> String {
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if f.fract() == 0.0 && f.abs() < 1e17 {
        return format!("{}", f as i64);
    }
    format!("{}", f)
}

/// Resolve Redis-style start/stop indices (negatives count from the end)
/// into an inclusive range, or None when it selects nothing
pub(crate) fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Modify the value stored at `key` in place, `Ok(None)` when the key is absent
///
/// Collections left empty are removed.
pub(crate) fn modify<T>(
    ctx: &mut CommandContext,
    key: &Bytes,
    apply: impl FnOnce(&mut Value) -> DbResult<T>,
) -> DbResult<Option<T>> {
    let result = match ctx.store.get_mut(key) {
        Some(obj) => {
            let mut value = obj.value_mut();
            apply(&mut value)
        }
        None => return Ok(None),
    };

    let emptied = ctx
        .store
        .peek(key)
        .map_or(false, |obj| obj.value().is_empty_collection());
    if emptied {
        ctx.store.remove(key);
    }
    result.map(Some)
}

/// Like [`modify`], creating the key with `init()` first when it is absent
///
/// A freshly created key is removed again if `apply` fails.
pub(crate) fn modify_or_create<T>(
    ctx: &mut CommandContext,
    key: &Bytes,
    init: fn() -> Value,
    apply: impl FnOnce(&mut Value) -> DbResult<T>,
) -> DbResult<T> {
    let created = !ctx.store.contains(key);
    if created {
        ctx.store.set(key.clone(), init());
    }

    match modify(ctx, key, apply) {
        Ok(Some(result)) => Ok(result),
        Ok(None) => Err(DbError::NoSuchKey),
        Err(e) => {
            if created {
                ctx.store.remove(key);
            }
            Err(e)
        }
    }
}
