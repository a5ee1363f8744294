//! Stored objects and their packed type/encoding metadata

use super::value::Value;
use std::ops::{Deref, DerefMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Strings up to this size are reported as embedded
const EMBSTR_LIMIT: usize = 44;

/// `last_accessed` keeps only the low 24 bits of epoch seconds
const CLOCK_MASK: u32 = 0x00FF_FFFF;

pub const OBJ_TYPE_STRING: u8 = 0 << 4;
pub const OBJ_TYPE_LIST: u8 = 1 << 4;
pub const OBJ_TYPE_SET: u8 = 2 << 4;
pub const OBJ_TYPE_HASH: u8 = 3 << 4;
pub const OBJ_TYPE_ZSET: u8 = 4 << 4;
pub const OBJ_TYPE_JSON: u8 = 5 << 4;

pub const OBJ_ENCODING_RAW: u8 = 0;
pub const OBJ_ENCODING_INT: u8 = 1;
pub const OBJ_ENCODING_EMBSTR: u8 = 2;
pub const OBJ_ENCODING_DEQUE: u8 = 3;
pub const OBJ_ENCODING_HASHTABLE: u8 = 4;
pub const OBJ_ENCODING_BTREE: u8 = 5;
pub const OBJ_ENCODING_JSON: u8 = 6;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current LRU clock: epoch seconds truncated to 24 bits
pub fn lru_clock() -> u32 {
    ((now_ms() / 1000) as u32) & CLOCK_MASK
}

/// Seconds elapsed between an LRU clock reading and `now`, tolerant of wrap-around
pub fn idle_seconds(last_accessed: u32, now: u32) -> u32 {
    now.wrapping_sub(last_accessed) & CLOCK_MASK
}

/// Compute the packed type/encoding byte for a value
pub fn type_encoding_of(value: &Value) -> u8 {
    match value {
        Value::Integer(_) => OBJ_TYPE_STRING | OBJ_ENCODING_INT,
        Value::String(b) if b.len() <= EMBSTR_LIMIT => OBJ_TYPE_STRING | OBJ_ENCODING_EMBSTR,
        Value::String(_) => OBJ_TYPE_STRING | OBJ_ENCODING_RAW,
        Value::List(_) => OBJ_TYPE_LIST | OBJ_ENCODING_DEQUE,
        Value::Set(_) => OBJ_TYPE_SET | OBJ_ENCODING_HASHTABLE,
        Value::Hash(_) => OBJ_TYPE_HASH | OBJ_ENCODING_HASHTABLE,
        Value::SortedSet(_) => OBJ_TYPE_ZSET | OBJ_ENCODING_BTREE,
        Value::Json(_) => OBJ_TYPE_JSON | OBJ_ENCODING_JSON,
    }
}

/// A stored value plus its metadata
///
/// The value is only reachable mutably through [`ValueMut`], which refreshes
/// `type_encoding` when dropped, so the byte always describes the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    value: Value,
    type_encoding: u8,
    last_accessed: u32,
}

impl Object {
    pub fn new(value: Value) -> Self {
        Object {
            type_encoding: type_encoding_of(&value),
            value,
            last_accessed: lru_clock(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Mutable access to the value; the encoding is recomputed when the guard drops
    pub fn value_mut(&mut self) -> ValueMut<'_> {
        ValueMut { object: self }
    }

    /// Replace the value wholesale
    pub fn replace(&mut self, value: Value) {
        self.type_encoding = type_encoding_of(&value);
        self.value = value;
    }

    pub fn type_encoding(&self) -> u8 {
        self.type_encoding
    }

    pub fn object_type(&self) -> u8 {
        self.type_encoding & 0xF0
    }

    pub fn encoding(&self) -> u8 {
        self.type_encoding & 0x0F
    }

    pub fn encoding_name(&self) -> &'static str {
        match self.encoding() {
            OBJ_ENCODING_INT => "int",
            OBJ_ENCODING_EMBSTR => "embstr",
            OBJ_ENCODING_DEQUE => "quicklist",
            OBJ_ENCODING_HASHTABLE => "hashtable",
            OBJ_ENCODING_BTREE => "skiplist",
            OBJ_ENCODING_JSON => "json",
            _ => "raw",
        }
    }

    pub fn last_accessed(&self) -> u32 {
        self.last_accessed
    }

    pub fn touch(&mut self) {
        self.last_accessed = lru_clock();
    }

    #[cfg(test)]
    pub(crate) fn set_last_accessed(&mut self, clock: u32) {
        self.last_accessed = clock & CLOCK_MASK;
    }
}

/// Guard handing out `&mut Value`, keeping the object's encoding consistent
pub struct ValueMut<'a> {
    object: &'a mut Object,
}

impl Deref for ValueMut<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.object.value
    }
}

impl DerefMut for ValueMut<'_> {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.object.value
    }
}

impl Drop for ValueMut<'_> {
    fn drop(&mut self) {
        self.object.type_encoding = type_encoding_of(&self.object.value);
    }
}
