//! RESP2 parser and encoder
//!
//! The parser walks the buffer with a cursor and only advances the buffer once
//! a whole value is available, so a partially received pipeline is never
//! consumed halfway.

use super::types::{RespValue, RespError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Upper bound for a single bulk string (512 MB, same as Redis)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest accepted nesting of arrays
const MAX_DEPTH: usize = 32;

/// RESP2 Parser
pub struct RespParser;

impl RespParser {
    /// Parse a RESP value from a buffer
    ///
    /// Returns Ok(Some(value)) if a complete value was parsed,
    /// Ok(None) if more data is needed,
    /// Err(e) if parsing failed
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let parsed = if is_type_prefix(buf[0]) {
            Self::parse_at(buf, 0, 0)?
        } else {
            Self::parse_inline(buf)?
        };

        match parsed {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Parse the value starting at `pos`, returning it with the position just past it
    fn parse_at(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(RespValue, usize)>, RespError> {
        if pos >= buf.len() {
            return Ok(None);
        }

        let (line, next) = match find_line(buf, pos + 1) {
            Some(found) => found,
            None => return Ok(None),
        };

        match buf[pos] {
            b'+' => Ok(Some((RespValue::SimpleString(line_to_string(line)?), next))),
            b'-' => Ok(Some((RespValue::Error(line_to_string(line)?), next))),
            b':' => Ok(Some((RespValue::Integer(line_to_int(line)?), next))),
            b'$' => {
                let len = line_to_int(line)?;
                if len == -1 {
                    return Ok(Some((RespValue::Null, next)));
                }
                if !(0..=MAX_BULK_LEN).contains(&len) {
                    return Err(RespError::InvalidProtocol(format!("Invalid bulk string length: {}", len)));
                }

                let end = next + len as usize;
                if buf.len() < end + 2 {
                    return Ok(None);
                }
                if &buf[end..end + 2] != CRLF {
                    return Err(RespError::InvalidProtocol(
                        "Missing CRLF after bulk string data".to_string(),
                    ));
                }
                let data = Bytes::copy_from_slice(&buf[next..end]);
                Ok(Some((RespValue::BulkString(data), end + 2)))
            }
            b'*' => {
                let count = line_to_int(line)?;
                if count == -1 {
                    return Ok(Some((RespValue::Null, next)));
                }
                if count < 0 {
                    return Err(RespError::InvalidProtocol(format!("Invalid array count: {}", count)));
                }
                if depth >= MAX_DEPTH {
                    return Err(RespError::InvalidProtocol(format!(
                        "Arrays nested deeper than {} levels",
                        MAX_DEPTH
                    )));
                }

                let mut cursor = next;
                let mut elements = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    match Self::parse_at(buf, cursor, depth + 1)? {
                        Some((value, after)) => {
                            elements.push(value);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(elements), cursor)))
            }
            other => Err(RespError::InvalidProtocol(format!(
                "Unknown type prefix: {}",
                other as char
            ))),
        }
    }

    /// Inline commands (`PING\r\n`) as typed into telnet
    fn parse_inline(buf: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        let (line, next) = match find_line(buf, 0) {
            Some(found) => found,
            None => return Ok(None),
        };

        let parts = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part)))
            .collect();

        Ok(Some((RespValue::Array(parts), next)))
    }
}

fn is_type_prefix(byte: u8) -> bool {
    matches!(byte, b'+' | b'-' | b':' | b'$' | b'*')
}

/// Find the CRLF-terminated line starting at `start`
fn find_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == CRLF)
        .map(|offset| (&buf[start..start + offset], start + offset + 2))
}

fn line_to_string(line: &[u8]) -> Result<String, RespError> {
    String::from_utf8(line.to_vec()).map_err(|_| RespError::InvalidUtf8)
}

fn line_to_int(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .map_err(|_| RespError::InvalidUtf8)?
        .parse::<i64>()
        .map_err(|_| RespError::InvalidInteger)
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => Self::put_line(buf, b'+', s.as_bytes()),
            RespValue::Error(e) => Self::put_line(buf, b'-', e.as_bytes()),
            RespValue::Integer(i) => Self::put_line(buf, b':', i.to_string().as_bytes()),
            RespValue::BulkString(bytes) => {
                Self::put_line(buf, b'$', bytes.len().to_string().as_bytes());
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(arr) => {
                Self::put_line(buf, b'*', arr.len().to_string().as_bytes());
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }

    fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
        buf.put_u8(prefix);
        buf.put_slice(body);
        buf.put_slice(CRLF);
    }
}
