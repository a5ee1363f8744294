//! List commands (LPUSH, RPUSH, LPOP, LRANGE, LLEN)

use super::{modify, modify_or_create, parse_int, resolve_range, Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

fn push(ctx: &mut CommandContext, args: &[Bytes], front: bool) -> DbResult<RespValue> {
    let key = &args[0];
    let len = modify_or_create(ctx, key, Value::empty_list, |value| match value {
        Value::List(list) => {
            for item in &args[1..] {
                if front {
                    list.push_front(item.clone());
                } else {
                    list.push_back(item.clone());
                }
            }
            Ok(list.len())
        }
        _ => Err(DbError::WrongType),
    })?;

    ctx.mark_write(key.clone());
    Ok(RespValue::integer(len as i64))
}

/// Native reply for the elements `start..=stop` of the list at `key`
pub(crate) fn list_range(ctx: &mut CommandContext, key: &[u8], start: i64, stop: i64) -> DbResult<RespValue> {
    let list = match ctx.store.get(key) {
        Some(obj) => match obj.value() {
            Value::List(list) => list,
            _ => return Err(DbError::WrongType),
        },
        None => return Ok(RespValue::array(vec![])),
    };

    let items = match resolve_range(start, stop, list.len()) {
        Some((from, to)) => list
            .range(from..=to)
            .map(|item| RespValue::BulkString(item.clone()))
            .collect(),
        None => Vec::new(),
    };
    Ok(RespValue::array(items))
}

/// LPUSH command - Prepend one or multiple values to a list
///
/// Syntax: LPUSH key value [value ...]
pub struct LPushCommand;

impl Command for LPushCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        push(ctx, args, true)
    }

    fn name(&self) -> &'static str {
        "LPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// RPUSH command - Append one or multiple values to a list
///
/// Syntax: RPUSH key value [value ...]
pub struct RPushCommand;

impl Command for RPushCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        push(ctx, args, false)
    }

    fn name(&self) -> &'static str {
        "RPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// LPOP command - Remove and return the first element of a list
///
/// Syntax: LPOP key
pub struct LPopCommand;

impl Command for LPopCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        let popped = modify(ctx, key, |value| match value {
            Value::List(list) => Ok(list.pop_front()),
            _ => Err(DbError::WrongType),
        })?;

        match popped.flatten() {
            Some(item) => {
                ctx.mark_write(key.clone());
                Ok(RespValue::BulkString(item))
            }
            None => Ok(RespValue::null()),
        }
    }

    fn name(&self) -> &'static str {
        "LPOP"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// LRANGE command - Get a range of elements from a list
///
/// Syntax: LRANGE key start stop
pub struct LRangeCommand;

impl Command for LRangeCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;
        list_range(ctx, &args[0], start, stop)
    }

    fn name(&self) -> &'static str {
        "LRANGE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// LLEN command - Get the length of a list
///
/// Syntax: LLEN key
pub struct LLenCommand;

impl Command for LLenCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        match ctx.store.get(&args[0]) {
            Some(obj) => match obj.value() {
                Value::List(list) => Ok(RespValue::integer(list.len() as i64)),
                _ => Err(DbError::WrongType),
            },
            None => Ok(RespValue::integer(0)),
        }
    }

    fn name(&self) -> &'static str {
        "LLEN"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MutationOp;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    fn bulk_array(items: &[&str]) -> RespValue {
        RespValue::array(items.iter().map(|i| RespValue::bulk_string(i.to_string())).collect())
    }

    #[test]
    fn test_lpush_rpush_lrange() {
        let mut ctx = CommandContext::new();
        assert_eq!(RPushCommand.execute(&mut ctx, &args(&["l", "b", "c"])), Ok(RespValue::integer(2)));
        assert_eq!(LPushCommand.execute(&mut ctx, &args(&["l", "a"])), Ok(RespValue::integer(3)));

        assert_eq!(
            LRangeCommand.execute(&mut ctx, &args(&["l", "0", "-1"])),
            Ok(bulk_array(&["a", "b", "c"]))
        );
        assert_eq!(
            LRangeCommand.execute(&mut ctx, &args(&["l", "-2", "10"])),
            Ok(bulk_array(&["b", "c"]))
        );
        assert_eq!(LRangeCommand.execute(&mut ctx, &args(&["l", "5", "10"])), Ok(bulk_array(&[])));
        assert_eq!(LLenCommand.execute(&mut ctx, &args(&["l"])), Ok(RespValue::integer(3)));
    }

    #[test]
    fn test_lpush_multiple_reverses_order() {
        let mut ctx = CommandContext::new();
        LPushCommand.execute(&mut ctx, &args(&["l", "a", "b", "c"])).unwrap();
        assert_eq!(
            LRangeCommand.execute(&mut ctx, &args(&["l", "0", "-1"])),
            Ok(bulk_array(&["c", "b", "a"]))
        );
    }

    #[test]
    fn test_lpop_removes_empty_list() {
        let mut ctx = CommandContext::new();
        RPushCommand.execute(&mut ctx, &args(&["l", "only"])).unwrap();
        ctx.take_marks();

        assert_eq!(LPopCommand.execute(&mut ctx, &args(&["l"])), Ok(RespValue::bulk_string("only")));
        assert!(!ctx.store.contains(b"l"));
        assert_eq!(ctx.take_marks()[0].op, MutationOp::Del);

        assert_eq!(LPopCommand.execute(&mut ctx, &args(&["l"])), Ok(RespValue::null()));
        assert!(ctx.take_marks().is_empty());
    }

    #[test]
    fn test_list_wrong_type() {
        let mut ctx = CommandContext::new();
        ctx.store.set("s", Value::string("v"));
        assert_eq!(LPushCommand.execute(&mut ctx, &args(&["s", "x"])), Err(DbError::WrongType));
        assert_eq!(LLenCommand.execute(&mut ctx, &args(&["s"])), Err(DbError::WrongType));
        assert_eq!(ctx.store.peek(b"s").unwrap().value(), &Value::string("v"));
    }
}
