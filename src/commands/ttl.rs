//! TTL commands (EXPIRE, PEXPIRE, TTL, PTTL, PERSIST)

use super::{parse_int, Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::events::MutationOp;
use crate::protocol::RespValue;
use crate::store::now_ms;
use bytes::Bytes;

/// Attach a relative timeout in milliseconds; a non-positive one deletes the key
fn expire_in(ctx: &mut CommandContext, key: &Bytes, ttl_ms: i64) -> DbResult<RespValue> {
    if !ctx.store.contains(key) {
        return Ok(RespValue::integer(0));
    }

    if ttl_ms <= 0 {
        ctx.store.remove(key);
        ctx.mark(key.clone(), MutationOp::Del);
        return Ok(RespValue::integer(1));
    }

    ctx.store.set_expiry(key, now_ms().saturating_add(ttl_ms as u64));
    ctx.mark(key.clone(), MutationOp::Expire);
    Ok(RespValue::integer(1))
}

/// Remaining time to live in milliseconds, -1 without deadline, -2 when absent
fn remaining_ms(ctx: &mut CommandContext, key: &[u8]) -> i64 {
    if !ctx.store.contains(key) {
        return -2;
    }
    match ctx.store.expiry(key) {
        Some(deadline) => deadline.saturating_sub(now_ms()) as i64,
        None => -1,
    }
}

/// EXPIRE command - Set a timeout on a key
///
/// Syntax: EXPIRE key seconds
pub struct ExpireCommand;

impl Command for ExpireCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let seconds = parse_int(&args[1])?;
        let ttl_ms = seconds
            .checked_mul(1000)
            .ok_or_else(|| DbError::InvalidExpire("expire".to_string()))?;
        expire_in(ctx, &args[0], ttl_ms)
    }

    fn name(&self) -> &'static str {
        "EXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// PEXPIRE command - Set a timeout on a key in milliseconds
///
/// Syntax: PEXPIRE key milliseconds
pub struct PExpireCommand;

impl Command for PExpireCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let ttl_ms = parse_int(&args[1])?;
        expire_in(ctx, &args[0], ttl_ms)
    }

    fn name(&self) -> &'static str {
        "PEXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

/// TTL command - Get the time to live for a key
///
/// Syntax: TTL key
///
/// Returns:
/// - The TTL in seconds (rounded)
/// - -1 if the key exists but has no expiration
/// - -2 if the key does not exist
pub struct TtlCommand;

impl Command for TtlCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let ms = remaining_ms(ctx, &args[0]);
        let ttl = if ms < 0 { ms } else { (ms + 500) / 1000 };
        Ok(RespValue::integer(ttl))
    }

    fn name(&self) -> &'static str {
        "TTL"
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

/// PTTL command - Get the time to live for a key in milliseconds
///
/// Syntax: PTTL key
pub struct PTtlCommand;

impl Command for PTtlCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        Ok(RespValue::integer(remaining_ms(ctx, &args[0])))
    }

    fn name(&self) -> &'static str {
        "PTTL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

/// PERSIST command - Remove the timeout of a key
///
/// Syntax: PERSIST key
pub struct PersistCommand;

impl Command for PersistCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        if ctx.store.persist(&args[0]) {
            ctx.mark(args[0].clone(), MutationOp::Persist);
            Ok(RespValue::integer(1))
        } else {
            Ok(RespValue::integer(0))
        }
    }

    fn name(&self) -> &'static str {
        "PERSIST"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_expire_ttl() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));

        let result = ExpireCommand.execute(&mut ctx, &args(&["key1", "100"]));
        assert_eq!(result, Ok(RespValue::integer(1)));

        // Should be around 100, but might be 99 due to timing
        match TtlCommand.execute(&mut ctx, &args(&["key1"])) {
            Ok(RespValue::Integer(ttl)) => assert!((99..=100).contains(&ttl)),
            other => panic!("Expected integer response, got {:?}", other),
        }

        let marks = ctx.take_marks();
        assert_eq!(marks[0].op, MutationOp::Expire);
    }

    #[test]
    fn test_ttl_no_key() {
        let mut ctx = CommandContext::new();
        let result = TtlCommand.execute(&mut ctx, &args(&["nonexistent"]));
        assert_eq!(result, Ok(RespValue::integer(-2)));
    }

    #[test]
    fn test_ttl_no_expiration() {
        let mut ctx = CommandContext::new();
        ctx.store.set("key1", Value::string("value1"));
        assert_eq!(TtlCommand.execute(&mut ctx, &args(&["key1"])), Ok(RespValue::integer(-1)));
        assert_eq!(PTtlCommand.execute(&mut ctx, &args(&["key1"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_expire_missing_key() {
        let mut ctx = CommandContext::new();
        assert_eq!(ExpireCommand.execute(&mut ctx, &args(&["nope", "10"])), Ok(RespValue::integer(0)));
        assert!(ctx.take_marks().is_empty());
    }

    #[test]
    fn test_non_positive_expire_deletes() {
        let mut ctx = CommandContext::new();
        ctx.store.set("k", Value::string("v"));
        assert_eq!(PExpireCommand.execute(&mut ctx, &args(&["k", "0"])), Ok(RespValue::integer(1)));
        assert!(!ctx.store.contains(b"k"));
        assert_eq!(ctx.take_marks()[0].op, MutationOp::Del);
    }

    #[test]
    fn test_persist() {
        let mut ctx = CommandContext::new();
        ctx.store.set("k", Value::string("v"));
        assert_eq!(PersistCommand.execute(&mut ctx, &args(&["k"])), Ok(RespValue::integer(0)));

        PExpireCommand.execute(&mut ctx, &args(&["k", "50000"])).unwrap();
        assert_eq!(PersistCommand.execute(&mut ctx, &args(&["k"])), Ok(RespValue::integer(1)));
        assert_eq!(TtlCommand.execute(&mut ctx, &args(&["k"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_expire_overflow() {
        let mut ctx = CommandContext::new();
        ctx.store.set("k", Value::string("v"));
        assert_eq!(
            ExpireCommand.execute(&mut ctx, &args(&["k", i64::MAX.to_string().as_str()])),
            Err(DbError::InvalidExpire("expire".to_string()))
        );
    }
}
