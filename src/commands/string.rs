//! String commands (SET, GET, MGET, MSET)

use super::{parse_int, Command, CommandContext, KeySpec};
use crate::error::{DbError, DbResult};
use crate::events::MutationOp;
use crate::protocol::RespValue;
use crate::store::{now_ms, Value};
use bytes::Bytes;

/// Reply for a string read: bulk string, null when absent
pub(crate) fn string_reply(ctx: &mut CommandContext, key: &[u8]) -> DbResult<RespValue> {
    match ctx.store.get(key) {
        Some(obj) => match obj.value().as_string_bytes() {
            Some(bytes) => Ok(RespValue::BulkString(bytes)),
            None => Err(DbError::WrongType),
        },
        None => Ok(RespValue::null()),
    }
}

#[derive(Debug, Default, PartialEq)]
struct SetOptions {
    ttl_ms: Option<u64>,
    only_if_absent: bool,
    only_if_present: bool,
    keep_ttl: bool,
}

fn parse_set_options(args: &[Bytes]) -> DbResult<SetOptions> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].to_ascii_uppercase();
        match flag.as_slice() {
            b"NX" => opts.only_if_absent = true,
            b"XX" => opts.only_if_present = true,
            b"KEEPTTL" => opts.keep_ttl = true,
            b"EX" | b"PX" => {
                if opts.ttl_ms.is_some() {
                    return Err(DbError::Syntax);
                }
                let amount = parse_int(args.get(i + 1).ok_or(DbError::Syntax)?)?;
                if amount <= 0 {
                    return Err(DbError::InvalidExpire("set".to_string()));
                }
                let ms = if flag.as_slice() == b"EX" {
                    amount.checked_mul(1000)
                } else {
                    Some(amount)
                };
                opts.ttl_ms = Some(ms.ok_or_else(|| DbError::InvalidExpire("set".to_string()))? as u64);
                i += 1;
            }
            _ => return Err(DbError::Syntax),
        }
        i += 1;
    }

    if (opts.only_if_absent && opts.only_if_present) || (opts.keep_ttl && opts.ttl_ms.is_some()) {
        return Err(DbError::Syntax);
    }
    Ok(opts)
}

/// SET command - Set a key to a value
///
/// Syntax: SET key value [EX seconds|PX milliseconds] [NX|XX] [KEEPTTL]
pub struct SetCommand;

impl Command for SetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = args[0].clone();
        let opts = parse_set_options(&args[2..])?;

        let exists = ctx.store.contains(&key);
        if (opts.only_if_absent && exists) || (opts.only_if_present && !exists) {
            return Ok(RespValue::null());
        }

        let value = Value::string(args[1].clone());
        if opts.keep_ttl {
            ctx.store.set_keep_ttl(key.clone(), value);
        } else {
            ctx.store.set(key.clone(), value);
        }
        if let Some(ttl_ms) = opts.ttl_ms {
            ctx.store.set_expiry(&key, now_ms().saturating_add(ttl_ms));
        }

        ctx.mark(key, MutationOp::Set);
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "SET"
    }

    fn min_args(&self) -> usize {
        2
    }
}

/// GET command - Get the value of a key
///
/// Syntax: GET key
pub struct GetCommand;

impl Command for GetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        string_reply(ctx, &args[0])
    }

    fn name(&self) -> &'static str {
        "GET"
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

/// MGET command - Get the values of several keys
///
/// Syntax: MGET key [key ...]
///
/// Keys holding a non-string value read as null.
pub struct MGetCommand;

impl Command for MGetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let values = args
            .iter()
            .map(|key| string_reply(ctx, key).unwrap_or(RespValue::Null))
            .collect();
        Ok(RespValue::Array(values))
    }

    fn name(&self) -> &'static str {
        "MGET"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Each(super::Gather::Ordered)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// MSET command - Set several keys at once
///
/// Syntax: MSET key value [key value ...]
pub struct MSetCommand;

impl Command for MSetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        if args.len() % 2 != 0 {
            return Err(DbError::WrongArity("MSET".to_string()));
        }

        for pair in args.chunks(2) {
            ctx.store.set(pair[0].clone(), Value::string(pair[1].clone()));
            ctx.mark(pair[0].clone(), MutationOp::Set);
        }
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "MSET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::Pairs
    }
}
