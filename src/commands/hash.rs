//! Hash commands (HSET, HGET, HGETALL, HDEL, HINCRBY)

use super::{modify, modify_or_create, parse_int, Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;
use std::collections::HashMap;

/// Read-only view of the hash at `key`; None when the key is absent
fn with_hash<T>(
    ctx: &mut CommandContext,
    key: &[u8],
    read: impl FnOnce(&HashMap<Bytes, Bytes>) -> T,
) -> DbResult<Option<T>> {
    match ctx.store.get(key) {
        Some(obj) => match obj.value() {
            Value::Hash(hash) => Ok(Some(read(hash))),
            _ => Err(DbError::WrongType),
        },
        None => Ok(None),
    }
}

/// HSET command - Set one or more fields of a hash
///
/// Syntax: HSET key field value [field value ...]
///
/// Returns the number of fields that were added (not updated).
pub struct HSetCommand;

impl Command for HSetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        if args.len() % 2 == 0 {
            return Err(DbError::WrongArity("HSET".to_string()));
        }

        let key = &args[0];
        let added = modify_or_create(ctx, key, Value::empty_hash, |value| match value {
            Value::Hash(hash) => Ok(args[1..]
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count()),
            _ => Err(DbError::WrongType),
        })?;

        ctx.mark_write(key.clone());
        Ok(RespValue::integer(added as i64))
    }

    fn name(&self) -> &'static str {
        "HSET"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// HGET command - Get the value of a hash field
///
/// Syntax: HGET key field
pub struct HGetCommand;

impl Command for HGetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let value = with_hash(ctx, &args[0], |hash| hash.get(&args[1]).cloned())?.flatten();
        Ok(value.map_or(RespValue::Null, RespValue::BulkString))
    }

    fn name(&self) -> &'static str {
        "HGET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// HGETALL command - Get all fields and values of a hash
///
/// Syntax: HGETALL key
///
/// Fields are returned sorted so equal hashes produce equal replies.
pub struct HGetAllCommand;

impl Command for HGetAllCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let pairs = with_hash(ctx, &args[0], |hash| {
            let mut pairs: Vec<(Bytes, Bytes)> =
                hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect();
            pairs.sort();
            pairs
        })?
        .unwrap_or_default();

        let flat = pairs
            .into_iter()
            .flat_map(|(field, value)| [RespValue::BulkString(field), RespValue::BulkString(value)])
            .collect();
        Ok(RespValue::Array(flat))
    }

    fn name(&self) -> &'static str {
        "HGETALL"
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

/// HDEL command - Delete one or more hash fields
///
/// Syntax: HDEL key field [field ...]
pub struct HDelCommand;

impl Command for HDelCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        let removed = modify(ctx, key, |value| match value {
            Value::Hash(hash) => Ok(args[1..].iter().filter(|f| hash.remove(*f).is_some()).count()),
            _ => Err(DbError::WrongType),
        })?
        .unwrap_or(0);

        if removed > 0 {
            ctx.mark_write(key.clone());
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "HDEL"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// HINCRBY command - Increment the integer value of a hash field
///
/// Syntax: HINCRBY key field increment
pub struct HIncrByCommand;

impl Command for HIncrByCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let (key, field) = (&args[0], &args[1]);
        let delta = parse_int(&args[2])?;

        let new_value = modify_or_create(ctx, key, Value::empty_hash, |value| match value {
            Value::Hash(hash) => {
                let current = match hash.get(field) {
                    Some(raw) => parse_int(raw).map_err(|_| DbError::NotInteger)?,
                    None => 0,
                };
                let updated = current.checked_add(delta).ok_or(DbError::Overflow)?;
                hash.insert(field.clone(), Bytes::from(updated.to_string()));
                Ok(updated)
            }
            _ => Err(DbError::WrongType),
        })?;

        ctx.mark_write(key.clone());
        Ok(RespValue::integer(new_value))
    }

    fn name(&self) -> &'static str {
        "HINCRBY"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_hset_hget() {
        let mut ctx = CommandContext::new();
        assert_eq!(
            HSetCommand.execute(&mut ctx, &args(&["user", "name", "Alice", "age", "30"])),
            Ok(RespValue::integer(2))
        );
        assert_eq!(
            HSetCommand.execute(&mut ctx, &args(&["user", "name", "Bob"])),
            Ok(RespValue::integer(0))
        );
        assert_eq!(
            HGetCommand.execute(&mut ctx, &args(&["user", "name"])),
            Ok(RespValue::bulk_string("Bob"))
        );
        assert_eq!(HGetCommand.execute(&mut ctx, &args(&["user", "nope"])), Ok(RespValue::null()));
        assert_eq!(HGetCommand.execute(&mut ctx, &args(&["nouser", "name"])), Ok(RespValue::null()));
    }

    #[test]
    fn test_hset_odd_pairs() {
        let mut ctx = CommandContext::new();
        assert_eq!(
            HSetCommand.execute(&mut ctx, &args(&["user", "name", "Alice", "age"])),
            Err(DbError::WrongArity("HSET".to_string()))
        );
    }

    #[test]
    fn test_hgetall_sorted() {
        let mut ctx = CommandContext::new();
        HSetCommand.execute(&mut ctx, &args(&["h", "b", "2", "a", "1"])).unwrap();
        assert_eq!(
            HGetAllCommand.execute(&mut ctx, &args(&["h"])),
            Ok(RespValue::array(vec![
                RespValue::bulk_string("a"),
                RespValue::bulk_string("1"),
                RespValue::bulk_string("b"),
                RespValue::bulk_string("2"),
            ]))
        );
    }

    #[test]
    fn test_hdel_removes_empty_hash() {
        let mut ctx = CommandContext::new();
        HSetCommand.execute(&mut ctx, &args(&["h", "f", "v"])).unwrap();
        assert_eq!(HDelCommand.execute(&mut ctx, &args(&["h", "f", "g"])), Ok(RespValue::integer(1)));
        assert!(!ctx.store.contains(b"h"));
    }

    #[test]
    fn test_hincrby() {
        let mut ctx = CommandContext::new();
        assert_eq!(HIncrByCommand.execute(&mut ctx, &args(&["h", "n", "5"])), Ok(RespValue::integer(5)));
        assert_eq!(HIncrByCommand.execute(&mut ctx, &args(&["h", "n", "-2"])), Ok(RespValue::integer(3)));

        HSetCommand.execute(&mut ctx, &args(&["h", "s", "text"])).unwrap();
        assert_eq!(HIncrByCommand.execute(&mut ctx, &args(&["h", "s", "1"])), Err(DbError::NotInteger));
    }

    #[test]
    fn test_hincrby_failure_on_new_key_creates_nothing() {
        let mut ctx = CommandContext::new();
        assert_eq!(HIncrByCommand.execute(&mut ctx, &args(&["h", "n", "x"])), Err(DbError::NotInteger));
        assert!(!ctx.store.contains(b"h"));
    }
}
