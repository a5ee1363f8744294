//! Set commands (SADD, SREM, SMEMBERS, SCARD, SISMEMBER, SMOVE)

use super::{modify, modify_or_create, Command, CommandContext, KeySpec};
use crate::error::{DbError, DbResult};
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

/// Read-only view of the set at `key`; None when the key is absent
fn with_set<T>(
    ctx: &mut CommandContext,
    key: &[u8],
    read: impl FnOnce(&std::collections::HashSet<Bytes>) -> T,
) -> DbResult<Option<T>> {
    match ctx.store.get(key) {
        Some(obj) => match obj.value() {
            Value::Set(set) => Ok(Some(read(set))),
            _ => Err(DbError::WrongType),
        },
        None => Ok(None),
    }
}

/// SADD command - Add one or more members to a set
///
/// Syntax: SADD key member [member ...]
pub struct SAddCommand;

impl Command for SAddCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        let added = modify_or_create(ctx, key, Value::empty_set, |value| match value {
            Value::Set(set) => Ok(args[1..].iter().filter(|m| set.insert((*m).clone())).count()),
            _ => Err(DbError::WrongType),
        })?;

        if added > 0 {
            ctx.mark_write(key.clone());
        }
        Ok(RespValue::integer(added as i64))
    }

    fn name(&self) -> &'static str {
        "SADD"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// SREM command - Remove one or more members from a set
///
/// Syntax: SREM key member [member ...]
pub struct SRemCommand;

impl Command for SRemCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        let removed = modify(ctx, key, |value| match value {
            Value::Set(set) => Ok(args[1..].iter().filter(|m| set.remove(*m)).count()),
            _ => Err(DbError::WrongType),
        })?
        .unwrap_or(0);

        if removed > 0 {
            ctx.mark_write(key.clone());
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "SREM"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// SMEMBERS command - Get all members of a set
///
/// Syntax: SMEMBERS key
///
/// Members are returned sorted, so equal sets always produce equal replies.
pub struct SMembersCommand;

impl Command for SMembersCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let members = with_set(ctx, &args[0], |set| {
            let mut members: Vec<Bytes> = set.iter().cloned().collect();
            members.sort();
            members
        })?
        .unwrap_or_default();

        Ok(RespValue::array(members.into_iter().map(RespValue::BulkString).collect()))
    }

    fn name(&self) -> &'static str {
        "SMEMBERS"
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

/// SCARD command - Get the number of members in a set
///
/// Syntax: SCARD key
pub struct SCardCommand;

impl Command for SCardCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let len = with_set(ctx, &args[0], |set| set.len())?.unwrap_or(0);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "SCARD"
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

/// SISMEMBER command - Check set membership
///
/// Syntax: SISMEMBER key member
pub struct SIsMemberCommand;

impl Command for SIsMemberCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let found = with_set(ctx, &args[0], |set| set.contains(&args[1]))?.unwrap_or(false);
        Ok(RespValue::integer(found as i64))
    }

    fn name(&self) -> &'static str {
        "SISMEMBER"
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

/// SMOVE command - Move a member from one set to another
///
/// Syntax: SMOVE source destination member
///
/// Both keys must live on the same shard.
pub struct SMoveCommand;

impl Command for SMoveCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let (src, dst, member) = (&args[0], &args[1], &args[2]);

        // Type-check both sides before touching either
        let present = match with_set(ctx, src, |set| set.contains(member))? {
            Some(present) => present,
            None => return Ok(RespValue::integer(0)),
        };
        // Moving onto the same set changes nothing
        if src == dst {
            return Ok(RespValue::integer(present as i64));
        }
        with_set(ctx, dst, |_| ())?;

        let moved = modify(ctx, src, |value| match value {
            Value::Set(set) => Ok(set.remove(member)),
            _ => Err(DbError::WrongType),
        })?
        .unwrap_or(false);
        if !moved {
            return Ok(RespValue::integer(0));
        }
        ctx.mark_write(src.clone());

        modify_or_create(ctx, dst, Value::empty_set, |value| match value {
            Value::Set(set) => Ok(set.insert(member.clone())),
            _ => Err(DbError::WrongType),
        })?;
        ctx.mark_write(dst.clone());
        Ok(RespValue::integer(1))
    }

    fn name(&self) -> &'static str {
        "SMOVE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Colocated(2)
    }
}
