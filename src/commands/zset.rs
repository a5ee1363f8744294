//! Sorted set commands (ZADD, ZREM, ZSCORE, ZCARD, ZRANGE)

use super::{format_float, modify, modify_or_create, parse_float, parse_int, resolve_range};
use super::{Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::protocol::RespValue;
use crate::store::{SortedSet, Value};
use bytes::Bytes;

fn with_zset<T>(
    ctx: &mut CommandContext,
    key: &[u8],
    read: impl FnOnce(&SortedSet) -> T,
) -> DbResult<Option<T>> {
    match ctx.store.get(key) {
        Some(obj) => match obj.value() {
            Value::SortedSet(zset) => Ok(Some(read(zset))),
            _ => Err(DbError::WrongType),
        },
        None => Ok(None),
    }
}

/// ZADD command - Add members with scores, updating existing scores
///
/// Syntax: ZADD key score member [score member ...]
///
/// Returns the number of new members.
pub struct ZAddCommand;

impl Command for ZAddCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        if args.len() % 2 == 0 {
            return Err(DbError::WrongArity("ZADD".to_string()));
        }

        // Parse every score before touching the set
        let entries = args[1..]
            .chunks(2)
            .map(|pair| Ok((parse_float(&pair[0])?, pair[1].clone())))
            .collect::<DbResult<Vec<(f64, Bytes)>>>()?;

        let key = &args[0];
        let (added, changed) = modify_or_create(ctx, key, Value::empty_sorted_set, |value| match value {
            Value::SortedSet(zset) => {
                let mut added = 0;
                let mut changed = false;
                for (score, member) in entries {
                    if zset.score(&member) == Some(score) {
                        continue;
                    }
                    changed = true;
                    if zset.insert(member, score) {
                        added += 1;
                    }
                }
                Ok((added, changed))
            }
            _ => Err(DbError::WrongType),
        })?;

        if changed {
            ctx.mark_write(key.clone());
        }
        Ok(RespValue::integer(added))
    }

    fn name(&self) -> &'static str {
        "ZADD"
    }

    fn min_args(&self) -> usize {
        3
    }
}

/// ZREM command - Remove members from a sorted set
///
/// Syntax: ZREM key member [member ...]
pub struct ZRemCommand;

impl Command for ZRemCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        let removed = modify(ctx, key, |value| match value {
            Value::SortedSet(zset) => Ok(args[1..].iter().filter(|m| zset.remove(m)).count()),
            _ => Err(DbError::WrongType),
        })?
        .unwrap_or(0);

        if removed > 0 {
            ctx.mark_write(key.clone());
        }
        Ok(RespValue::integer(removed as i64))
    }

    fn name(&self) -> &'static str {
        "ZREM"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// ZSCORE command - Get the score of a member
///
/// Syntax: ZSCORE key member
pub struct ZScoreCommand;

impl Command for ZScoreCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let score = with_zset(ctx, &args[0], |zset| zset.score(&args[1]))?.flatten();
        Ok(score.map_or(RespValue::Null, |s| RespValue::bulk_string(format_float(s))))
    }

    fn name(&self) -> &'static str {
        "ZSCORE"
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

/// ZCARD command - Get the number of members
///
/// Syntax: ZCARD key
pub struct ZCardCommand;

impl Command for ZCardCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let len = with_zset(ctx, &args[0], |zset| zset.len())?.unwrap_or(0);
        Ok(RespValue::integer(len as i64))
    }

    fn name(&self) -> &'static str {
        "ZCARD"
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

/// ZRANGE command - Members by rank, lowest score first
///
/// Syntax: ZRANGE key start stop [WITHSCORES]
pub struct ZRangeCommand;

impl Command for ZRangeCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;
        let with_scores = match args.get(3) {
            Some(flag) if flag.eq_ignore_ascii_case(b"WITHSCORES") => true,
            Some(_) => return Err(DbError::Syntax),
            None => false,
        };

        let items = with_zset(ctx, &args[0], |zset| {
            let (from, to) = match resolve_range(start, stop, zset.len()) {
                Some(range) => range,
                None => return Vec::new(),
            };
            let mut items = Vec::new();
            for (member, score) in zset.iter().skip(from).take(to - from + 1) {
                items.push(RespValue::BulkString(member.clone()));
                if with_scores {
                    items.push(RespValue::bulk_string(format_float(score)));
                }
            }
            items
        })?
        .unwrap_or_default();

        Ok(RespValue::Array(items))
    }

    fn name(&self) -> &'static str {
        "ZRANGE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(4)
    }

    fn watchable(&self) -> bool {
        true
    }
}
