//! JSON document commands (JSON.SET, JSON.GET, JSON.DEL)
//!
//! Documents are stored whole; only the root path (`$` or `.`) is addressable.
//! Queries reach inside documents through `$value.path` instead.

use super::{Command, CommandContext};
use crate::error::{DbError, DbResult};
use crate::events::MutationOp;
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

fn check_root_path(path: Option<&Bytes>) -> DbResult<()> {
    match path.map(|p| &p[..]) {
        None | Some(b"$") | Some(b".") => Ok(()),
        Some(_) => Err(DbError::Syntax),
    }
}

/// JSON.SET command - Store a JSON document
///
/// Syntax: JSON.SET key $ json [NX|XX]
pub struct JsonSetCommand;

impl Command for JsonSetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        let key = &args[0];
        check_root_path(Some(&args[1]))?;
        let doc: serde_json::Value =
            serde_json::from_slice(&args[2]).map_err(|e| DbError::InvalidJson(e.to_string()))?;

        let exists = ctx.store.contains(key);
        match args.get(3).map(|f| f.to_ascii_uppercase()) {
            Some(flag) if flag.as_slice() == b"NX" && exists => return Ok(RespValue::null()),
            Some(flag) if flag.as_slice() == b"XX" && !exists => return Ok(RespValue::null()),
            Some(flag) if flag.as_slice() != b"NX" && flag.as_slice() != b"XX" => {
                return Err(DbError::Syntax)
            }
            _ => {}
        }

        ctx.store.set_keep_ttl(key.clone(), Value::Json(doc));
        ctx.mark(key.clone(), MutationOp::Set);
        Ok(RespValue::ok())
    }

    fn name(&self) -> &'static str {
        "JSON.SET"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(4)
    }
}

/// JSON.GET command - Get a JSON document as text
///
/// Syntax: JSON.GET key [$]
pub struct JsonGetCommand;

impl Command for JsonGetCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        check_root_path(args.get(1))?;
        match ctx.store.get(&args[0]) {
            Some(obj) => match obj.value() {
                Value::Json(doc) => Ok(RespValue::bulk_string(doc.to_string())),
                _ => Err(DbError::WrongType),
            },
            None => Ok(RespValue::null()),
        }
    }

    fn name(&self) -> &'static str {
        "JSON.GET"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn watchable(&self) -> bool {
        true
    }
}

/// JSON.DEL command - Delete a JSON document
///
/// Syntax: JSON.DEL key [$]
pub struct JsonDelCommand;

impl Command for JsonDelCommand {
    fn execute(&self, ctx: &mut CommandContext, args: &[Bytes]) -> DbResult<RespValue> {
        check_root_path(args.get(1))?;
        let key = &args[0];
        match ctx.store.get(key) {
            Some(obj) if !matches!(obj.value(), Value::Json(_)) => return Err(DbError::WrongType),
            Some(_) => {}
            None => return Ok(RespValue::integer(0)),
        }

        ctx.store.remove(key);
        ctx.mark(key.clone(), MutationOp::Del);
        Ok(RespValue::integer(1))
    }

    fn name(&self) -> &'static str {
        "JSON.DEL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_json_set_get_del() {
        let mut ctx = CommandContext::new();
        assert_eq!(
            JsonSetCommand.execute(&mut ctx, &args(&["doc", "$", r#"{"name":"ada","age":36}"#])),
            Ok(RespValue::ok())
        );
        assert_eq!(
            JsonGetCommand.execute(&mut ctx, &args(&["doc"])),
            Ok(RespValue::bulk_string(r#"{"age":36,"name":"ada"}"#))
        );
        assert_eq!(JsonDelCommand.execute(&mut ctx, &args(&["doc", "$"])), Ok(RespValue::integer(1)));
        assert_eq!(JsonGetCommand.execute(&mut ctx, &args(&["doc"])), Ok(RespValue::null()));
        assert_eq!(JsonDelCommand.execute(&mut ctx, &args(&["doc"])), Ok(RespValue::integer(0)));
    }

    #[test]
    fn test_json_set_rejects_bad_input() {
        let mut ctx = CommandContext::new();
        assert!(matches!(
            JsonSetCommand.execute(&mut ctx, &args(&["doc", "$", "{not json"])),
            Err(DbError::InvalidJson(_))
        ));
        assert_eq!(
            JsonSetCommand.execute(&mut ctx, &args(&["doc", "$.a", "1"])),
            Err(DbError::Syntax)
        );
        assert!(ctx.take_marks().is_empty());
    }

    #[test]
    fn test_json_set_nx_xx() {
        let mut ctx = CommandContext::new();
        assert_eq!(JsonSetCommand.execute(&mut ctx, &args(&["d", "$", "1", "XX"])), Ok(RespValue::null()));
        assert_eq!(JsonSetCommand.execute(&mut ctx, &args(&["d", "$", "1", "NX"])), Ok(RespValue::ok()));
        assert_eq!(JsonSetCommand.execute(&mut ctx, &args(&["d", "$", "2", "NX"])), Ok(RespValue::null()));
    }

    #[test]
    fn test_json_on_wrong_type() {
        let mut ctx = CommandContext::new();
        ctx.store.set("s", Value::string("v"));
        assert_eq!(JsonGetCommand.execute(&mut ctx, &args(&["s"])), Err(DbError::WrongType));
        assert_eq!(JsonDelCommand.execute(&mut ctx, &args(&["s"])), Err(DbError::WrongType));
    }
}
