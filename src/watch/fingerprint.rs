//! Watch fingerprints
//!
//! A fingerprint identifies "the same watch" across connections. It is an
//! xxh64 digest rendered in decimal, stable for the lifetime of the process.

use crate::query::Query;
use bytes::Bytes;
use xxhash_rust::xxh64::xxh64;

const COMMAND_DOMAIN: u8 = b'c';
const QUERY_DOMAIN: u8 = b'q';

/// Fingerprint of a command watch: upper-cased name plus length-prefixed arguments
pub fn command_fingerprint(name: &str, args: &[Bytes]) -> String {
    let mut buf = Vec::with_capacity(1 + name.len() + args.iter().map(|a| a.len() + 8).sum::<usize>());
    buf.push(COMMAND_DOMAIN);
    buf.extend_from_slice(name.to_ascii_uppercase().as_bytes());
    for arg in args {
        buf.extend_from_slice(&(arg.len() as u64).to_le_bytes());
        buf.extend_from_slice(arg);
    }
    xxh64(&buf, 0).to_string()
}

/// Fingerprint of a query: its canonical text
pub fn query_fingerprint(query: &Query) -> String {
    let canonical = query.canonical();
    let mut buf = Vec::with_capacity(1 + canonical.len());
    buf.push(QUERY_DOMAIN);
    buf.extend_from_slice(canonical.as_bytes());
    xxh64(&buf, 0).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[test]
    fn test_command_fingerprint_is_stable_and_case_insensitive() {
        assert_eq!(
            command_fingerprint("GET", &args(&["a"])),
            command_fingerprint("get", &args(&["a"]))
        );
        assert_ne!(
            command_fingerprint("GET", &args(&["a"])),
            command_fingerprint("GET", &args(&["b"]))
        );
        assert!(command_fingerprint("GET", &args(&["a"])).parse::<u64>().is_ok());
    }

    #[test]
    fn test_arguments_are_length_prefixed() {
        assert_ne!(
            command_fingerprint("MGET", &args(&["ab", "c"])),
            command_fingerprint("MGET", &args(&["a", "bc"]))
        );
    }

    #[test]
    fn test_query_fingerprint_uses_canonical_text() {
        let a = Query::parse("SELECT $key WHERE $value > 1 AND $key LIKE 'x*'").unwrap();
        let b = Query::parse("select $key where $key like 'x*' and $value > 1").unwrap();
        let c = Query::parse("SELECT $key WHERE $value > 2 AND $key LIKE 'x*'").unwrap();
        assert_eq!(query_fingerprint(&a), query_fingerprint(&b));
        assert_ne!(query_fingerprint(&a), query_fingerprint(&c));
    }
}
