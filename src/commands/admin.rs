//! Admin commands (INFO, FLUSHDB, DBSIZE, PING)
//!
//! INFO, FLUSHDB and DBSIZE run on every shard; the router merges the replies.

use super::{Command, CommandContext, Gather, KeySpec};
use crate::error::DbResult;
use crate::events::MutationOp;
use crate::protocol::RespValue;
use bytes::Bytes;

/// INFO command - Statistics of the shard it runs on
///
/// Syntax: INFO [section]
pub struct InfoCommand;

impl Command for InfoCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[Bytes]) -> DbResult<RespValue> {
        let stats = ctx.store.stats();

        let info = format!(
            "# Shard {}\r\n\
            keys:{}\r\n\
            expires:{}\r\n\
            expired_keys:{}\r\n\
            evicted_keys:{}\r\n\
            used_memory:{}\r\n",
            ctx.shard_id,
            stats.keys,
            stats.keys_with_expiry,
            stats.expired_total,
            stats.evicted_total,
            stats.used_memory_bytes
        );

        Ok(RespValue::bulk_string(info))
    }

    fn name(&self) -> &'static str {
        "INFO"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::All(Gather::Text)
    }
}

/// FLUSHDB command - Remove all keys from the current database
///
/// Syntax: FLUSHDB
pub struct FlushDbCommand;

impl Command for FlushDbCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[Bytes]) -> DbResult<RespValue> {
        for key in ctx.store.clear() {
            ctx.mark(key, MutationOp::Del);
        }
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "FLUSHDB"
    }

    fn max_args(&self) -> Option<usize> {
        Some(0)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::All(Gather::AllOk)
    }
}

/// DBSIZE command - Number of keys
///
/// Syntax: DBSIZE
pub struct DbSizeCommand;

impl Command for DbSizeCommand {
    fn execute(&self, ctx: &mut CommandContext, _args: &[Bytes]) -> DbResult<RespValue> {
        Ok(RespValue::integer(ctx.store.len() as i64))
    }

    fn name(&self) -> &'static str {
        "DBSIZE"
    }

    fn max_args(&self) -> Option<usize> {
        Some(0)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::All(Gather::Sum)
    }
}

/// PING command - Liveness check
///
/// Syntax: PING [message]
pub struct PingCommand;

impl Command for PingCommand {
    fn execute(&self, _ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        match args.first() {
            Some(message) => Ok(RespValue::BulkString(message.clone())),
            None => Ok(RespValue::simple_string("PONG")),
        }
    }

    fn name(&self) -> &'static str {
        "PING"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;

    #[test]
    fn test_info() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));
        ctx.store.set("key2", Value::string("value2"));

        match InfoCommand.execute(&mut ctx, &[]) {
            Ok(RespValue::BulkString(bytes)) => {
                let info = String::from_utf8(bytes.to_vec()).unwrap();
                assert!(info.contains("# Shard 0"));
                assert!(info.contains("keys:2"));
            }
            other => panic!("Expected bulk string response, got {:?}", other),
        }
    }

    #[test]
    fn test_flushdb() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));
        ctx.store.set("key2", Value::string("value2"));

        assert_eq!(ctx.store.len(), 2);
        assert_eq!(FlushDbCommand.execute(&mut ctx, &[]), Ok(RespValue::ok()));
        assert_eq!(ctx.store.len(), 0);

        let marks = ctx.take_marks();
        assert_eq!(marks.len(), 2);
        assert!(marks.iter().all(|m| m.op == MutationOp::Del));
    }

    #[test]
    fn test_dbsize_and_ping() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));
        assert_eq!(DbSizeCommand.execute(&mut ctx, &[]), Ok(RespValue::integer(1)));
        assert_eq!(PingCommand.execute(&mut ctx, &[]), Ok(RespValue::simple_string("PONG")));
        assert_eq!(
            PingCommand.execute(&mut ctx, &[Bytes::from("hi")]),
            Ok(RespValue::bulk_string("hi"))
        );
    }
}
