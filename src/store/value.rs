//! Value types for the key-value store

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Represents the different types of values that can be stored
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value (binary-safe)
    String(Bytes),

    /// String holding a canonical integer (counters, numeric SETs)
    Integer(i64),

    /// List of values (ordered)
    List(VecDeque<Bytes>),

    /// Set of unique values (unordered)
    Set(HashSet<Bytes>),

    /// Hash map (field -> value)
    Hash(HashMap<Bytes, Bytes>),

    /// Members ordered by score
    SortedSet(SortedSet),

    /// Structured document set through JSON.SET
    Json(serde_json::Value),
}

impl Value {
    /// Create a string value, int-encoding it when it is a canonical integer
    pub fn string(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        match parse_canonical_int(&bytes) {
            Some(i) => Value::Integer(i),
            None => Value::String(bytes),
        }
    }

    pub fn empty_list() -> Self {
        Value::List(VecDeque::new())
    }

    pub fn empty_set() -> Self {
        Value::Set(HashSet::new())
    }

    pub fn empty_hash() -> Self {
        Value::Hash(HashMap::new())
    }

    pub fn empty_sorted_set() -> Self {
        Value::SortedSet(SortedSet::new())
    }

    /// Get the type name as reported by TYPE
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) | Value::Integer(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::SortedSet(_) => "zset",
            Value::Json(_) => "ReJSON-RL",
        }
    }

    /// String payload of a string-typed value
    pub fn as_string_bytes(&self) -> Option<Bytes> {
        match self {
            Value::String(b) => Some(b.clone()),
            Value::Integer(i) => Some(Bytes::from(i.to_string())),
            _ => None,
        }
    }

    /// True when the collection holds no elements (collections are removed when emptied)
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::SortedSet(zset) => zset.is_empty(),
            _ => false,
        }
    }

    /// Approximate memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        match self {
            Value::String(bytes) => bytes.len(),
            Value::Integer(_) => std::mem::size_of::<i64>(),
            Value::List(list) => list.iter().map(|b| b.len()).sum::<usize>()
                + std::mem::size_of::<VecDeque<Bytes>>(),
            Value::Set(set) => set.iter().map(|b| b.len()).sum::<usize>()
                + std::mem::size_of::<HashSet<Bytes>>(),
            Value::Hash(hash) => hash.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
                + std::mem::size_of::<HashMap<Bytes, Bytes>>(),
            Value::SortedSet(zset) => zset.len() * (std::mem::size_of::<f64>() * 2)
                + zset.iter().map(|(m, _)| m.len() * 2).sum::<usize>(),
            Value::Json(json) => json.to_string().len(),
        }
    }
}

/// Parse bytes as an i64 only if formatting it back yields the same bytes
pub fn parse_canonical_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 20 {
        return None;
    }
    let s = std::str::from_utf8(bytes).ok()?;
    let i = s.parse::<i64>().ok()?;
    if i.to_string().as_bytes() == bytes {
        Some(i)
    } else {
        None
    }
}

/// Score wrapper giving f64 a total order (NaN is rejected at the command layer)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set: member -> score plus a (score, member) ordered index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(Score, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a member, returns true if the member is new
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                self.ordered.insert((Score(score), member));
                false
            }
            None => {
                self.ordered.insert((Score(score), member));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &Bytes) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.clone()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &Bytes) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members in ascending (score, member) order
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.ordered.iter().map(|(score, member)| (member, score.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_int_encoded_only_when_canonical() {
        assert_eq!(Value::string("42"), Value::Integer(42));
        assert_eq!(Value::string("-7"), Value::Integer(-7));
        assert_eq!(Value::string("007"), Value::String(Bytes::from("007")));
        assert_eq!(Value::string("4.2"), Value::String(Bytes::from("4.2")));
        assert_eq!(Value::string(""), Value::String(Bytes::new()));
    }

    #[test]
    fn test_sorted_set_orders_by_score_then_member() {
        let mut zset = SortedSet::new();
        assert!(zset.insert(Bytes::from("b"), 2.0));
        assert!(zset.insert(Bytes::from("a"), 2.0));
        assert!(zset.insert(Bytes::from("c"), 1.0));
        assert!(!zset.insert(Bytes::from("c"), 3.0));

        let members: Vec<_> = zset.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(members, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert_eq!(zset.score(&Bytes::from("c")), Some(3.0));

        assert!(zset.remove(&Bytes::from("a")));
        assert_eq!(zset.len(), 2);
    }
}
