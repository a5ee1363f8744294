//! Error types for VigilDB
//!
//! Every failure a command, a routing decision or a watch request can produce.
//! Client errors are rendered back to the caller as RESP errors; internal
//! errors describe infrastructure that stopped answering.

use crate::protocol::RespValue;
use crate::query::QueryError;
use thiserror::Error;

/// Result type alias using DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Unified error type for command execution and watch requests
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    // -------------------------------------------------------------------------
    // Client errors
    // -------------------------------------------------------------------------
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR invalid JSON: {0}")]
    InvalidJson(String),

    #[error("ERR {0}")]
    Query(#[from] QueryError),

    #[error("ERR command '{0}' cannot be watched")]
    NotWatchable(String),

    #[error("ERR no watch registered for fingerprint {0}")]
    UnknownFingerprint(String),

    // -------------------------------------------------------------------------
    // Routing errors
    // -------------------------------------------------------------------------
    #[error("CROSSSLOT Keys in request don't hash to the same shard")]
    CrossShard,

    // -------------------------------------------------------------------------
    // Internal errors
    // -------------------------------------------------------------------------
    #[error("ERR shard {0} is unavailable")]
    ShardUnavailable(usize),

    #[error("ERR watch engine is not running")]
    WatchUnavailable,
}

impl DbError {
    /// Render the error as a RESP error reply
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(self.to_string())
    }

    /// True for failures of the engine itself rather than of the request
    pub fn is_internal(&self) -> bool {
        matches!(self, DbError::ShardUnavailable(_) | DbError::WatchUnavailable)
    }
}
