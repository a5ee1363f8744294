//! Search commands (KEYS)

use super::{Command, CommandContext, Gather, KeySpec};
use crate::error::DbResult;
use crate::protocol::RespValue;
use bytes::Bytes;

/// KEYS command - Find all keys matching a pattern
///
/// Syntax: KEYS pattern
///
/// Supported patterns (see [`crate::glob`]):
/// - * : any run of bytes
/// - ? : exactly one byte
/// - [abc], [a-z], [^abc] : byte classes
/// - \x : literal x
///
/// Runs on every shard; the replies are concatenated.
pub struct KeysCommand;

impl Command for KeysCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let mut keys = ctx.store.keys(&args[0]);
        keys.sort();
        Ok(RespValue::Array(keys.into_iter().map(RespValue::BulkString).collect()))
    }

    fn name(&self) -> &'static str {
        "KEYS"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::All(Gather::Concat)
    }
}
