//! Key commands (DEL, EXISTS, TYPE, RENAME)

use super::{Command, CommandContext, Gather, KeySpec};
use crate::error::{DbError, DbResult};
use crate::events::MutationOp;
use crate::protocol::RespValue;
use bytes::Bytes;

/// DEL command - Delete one or more keys
///
/// Syntax: DEL key [key ...]
pub struct DelCommand;

impl Command for DelCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let mut deleted = 0;
        for key in args {
            if ctx.store.remove(key).is_some() {
                ctx.mark(key.clone(), MutationOp::Del);
                deleted += 1;
            }
        }
        Ok(RespValue::integer(deleted))
    }

    fn name(&self) -> &'static str {
        "DEL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Each(Gather::Sum)
    }
}

/// EXISTS command - Check if one or more keys exist
///
/// Syntax: EXISTS key [key ...]
pub struct ExistsCommand;

impl Command for ExistsCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let count = args.iter().filter(|key| ctx.store.contains(key)).count();
        Ok(RespValue::integer(count as i64))
    }

    fn name(&self) -> &'static str {
        "EXISTS"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Each(Gather::Sum)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// TYPE command - Name of the type stored at a key
///
/// Syntax: TYPE key
pub struct TypeCommand;

impl Command for TypeCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let name = ctx
            .store
            .get(&args[0])
            .map_or("none", |obj| obj.value().type_name());
        Ok(RespValue::simple_string(name))
    }

    fn name(&self) -> &'static str {
        "TYPE"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// RENAME command - Move a value to a new key, carrying its TTL
///
/// Syntax: RENAME key newkey
///
/// Both keys must live on the same shard.
pub struct RenameCommand;

impl Command for RenameCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let (src, dst) = (&args[0], &args[1]);
        if !ctx.store.contains(src) {
            return Err(DbError::NoSuchKey);
        }
        if src == dst {
            return Ok(RespValue::ok());
        }

        let deadline = ctx.store.expiry(src);
        let obj = ctx.store.remove(src).ok_or(DbError::NoSuchKey)?;
        ctx.store.set(dst.clone(), obj.into_value());
        if let Some(deadline) = deadline {
            ctx.store.set_expiry(dst, deadline);
        }

        ctx.mark(src.clone(), MutationOp::Del);
        ctx.mark(dst.clone(), MutationOp::Set);
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "RENAME"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Colocated(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{now_ms, Value};

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_del() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));
        ctx.store.set("key2", Value::string("value2"));

        let result = DelCommand.execute(&mut ctx, &args(&["key1", "key2", "key3"]));
        assert_eq!(result, Ok(RespValue::integer(2)));

        let marks = ctx.take_marks();
        assert_eq!(marks.len(), 2);
        assert!(marks.iter().all(|m| m.op == MutationOp::Del));
    }

    #[test]
    fn test_exists() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));

        let result = ExistsCommand.execute(&mut ctx, &args(&["key1", "key2", "key1"]));
        assert_eq!(result, Ok(RespValue::integer(2)));
    }

    #[test]
    fn test_type() {
        let mut ctx = CommandContext::new();
        ctx.store.set("s", Value::string("v"));
        ctx.store.set("l", Value::empty_list());

        assert_eq!(TypeCommand.execute(&mut ctx, &args(&["s"])), Ok(RespValue::simple_string("string")));
        assert_eq!(TypeCommand.execute(&mut ctx, &args(&["l"])), Ok(RespValue::simple_string("list")));
        assert_eq!(TypeCommand.execute(&mut ctx, &args(&["x"])), Ok(RespValue::simple_string("none")));
    }

    #[test]
    fn test_rename_moves_value_and_ttl() {
        let mut ctx = CommandContext::new();
        ctx.store.set("old", Value::string("v"));
        let deadline = now_ms() + 60_000;
        ctx.store.set_expiry(b"old", deadline);

        assert_eq!(RenameCommand.execute(&mut ctx, &args(&["old", "new"])), Ok(RespValue::ok()));
        assert!(!ctx.store.contains(b"old"));
        assert_eq!(ctx.store.expiry(b"new"), Some(deadline));
        assert_eq!(ctx.take_marks().len(), 2);
    }

    #[test]
    fn test_rename_missing_key() {
        let mut ctx = CommandContext::new();
        assert_eq!(
            RenameCommand.execute(&mut ctx, &args(&["nope", "new"])),
            Err(DbError::NoSuchKey)
        );
    }
}
