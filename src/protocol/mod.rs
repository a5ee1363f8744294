//! RESP2 protocol implementation
//!
//! Parses client requests into `RespValue`s and encodes replies and push
//! frames. Push frames share the array encoding of ordinary replies, so the
//! connection layer never needs a second code path for them.

mod types;
mod resp;

pub use types::{RespValue, RespError};
pub use resp::{RespParser, RespEncoder};
