//! Counter commands (INCR, INCRBY, DECR, DECRBY)
//!
//! All four share `incr_by`: a missing key counts from 0, an existing key
//! keeps its TTL, and anything but an integer-encoded string is rejected.

use super::{modify, parse_int, Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::events::MutationOp;
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

fn incr_by(ctx: &mut CommandContext, key: &Bytes, delta: i64) -> DbResult<RespValue> {
    let updated = modify(ctx, key, |value| match value {
        Value::Integer(i) => {
            *i = i.checked_add(delta).ok_or(DbError::Overflow)?;
            Ok(*i)
        }
        Value::String(_) => Err(DbError::NotInteger),
        _ => Err(DbError::WrongType),
    })?;

    let new_value = match updated {
        Some(i) => i,
        None => {
            ctx.store.set(key.clone(), Value::Integer(delta));
            delta
        }
    };

    ctx.mark(key.clone(), MutationOp::Set);
    Ok(RespValue::integer(new_value))
}

/// INCR command - Increment the integer value of a key by 1
///
/// Syntax: INCR key
pub struct IncrCommand;

impl Command for IncrCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        incr_by(ctx, &args[0], 1)
    }

    fn name(&self) -> &'static str {
        "INCR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// INCRBY command - Increment the integer value of a key by the given amount
///
/// Syntax: INCRBY key increment
pub struct IncrByCommand;

impl Command for IncrByCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let increment = parse_int(&args[1])?;
        incr_by(ctx, &args[0], increment)
    }

    fn name(&self) -> &'static str {
        "INCRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// DECR command - Decrement the integer value of a key by 1
///
/// Syntax: DECR key
pub struct DecrCommand;

impl Command for DecrCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        incr_by(ctx, &args[0], -1)
    }

    fn name(&self) -> &'static str {
        "DECR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// DECRBY command - Decrement the integer value of a key by the given amount
///
/// Syntax: DECRBY key decrement
pub struct DecrByCommand;

impl Command for DecrByCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let decrement = parse_int(&args[1])?;
        let delta = decrement.checked_neg().ok_or(DbError::Overflow)?;
        incr_by(ctx, &args[0], delta)
    }

    fn name(&self) -> &'static str {
        "DECRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}
