//! Query evaluation over a keyspace snapshot

use super::{CompareOp, Direction, Field, Literal, Operand, Predicate, Query};
use crate::glob::glob_match;
use crate::protocol::RespValue;
use crate::store::{Object, Value};
use bytes::Bytes;
use std::cmp::Ordering;

/// Rows of one evaluation, plus the keys they came from
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rows: RespValue,
    pub keys: Vec<Bytes>,
}

/// A comparable value extracted from a row
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Query {
    /// Whether the row `key`/`object` satisfies the WHERE clause
    pub fn matches(&self, key: &[u8], object: &Object) -> bool {
        match &self.predicate {
            Some(predicate) => eval_predicate(predicate, key, object),
            None => true,
        }
    }

    /// Filter, order and cap `entries`
    ///
    /// Rows are first put in key order so that ties under ORDER BY come out
    /// the same on every evaluation.
    pub fn evaluate(&self, mut entries: Vec<(Bytes, Object)>) -> QueryResult {
        entries.retain(|(key, object)| self.matches(key, object));
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(order) = &self.order_by {
            entries.sort_by(|(key_a, obj_a), (key_b, obj_b)| {
                let ordering = sort_order(
                    resolve(&order.field, key_a, obj_a).as_ref(),
                    resolve(&order.field, key_b, obj_b).as_ref(),
                );
                match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }

        let rows = entries
            .iter()
            .map(|(key, object)| {
                let mut row = Vec::with_capacity(2);
                if self.selection.key {
                    row.push(RespValue::BulkString(key.clone()));
                }
                if self.selection.value {
                    row.push(render_value(object.value()));
                }
                RespValue::Array(row)
            })
            .collect();

        QueryResult {
            rows: RespValue::Array(rows),
            keys: entries.into_iter().map(|(key, _)| key).collect(),
        }
    }
}

fn eval_predicate(predicate: &Predicate, key: &[u8], object: &Object) -> bool {
    match predicate {
        Predicate::Compare { left, op, right } => compare(
            operand_value(left, key, object),
            *op,
            operand_value(right, key, object),
        ),
        Predicate::And(a, b) => eval_predicate(a, key, object) && eval_predicate(b, key, object),
        Predicate::Or(a, b) => eval_predicate(a, key, object) || eval_predicate(b, key, object),
        Predicate::Not(inner) => !eval_predicate(inner, key, object),
    }
}

fn operand_value(operand: &Operand, key: &[u8], object: &Object) -> Option<Scalar> {
    match operand {
        Operand::Field(field) => resolve(field, key, object),
        Operand::Literal(literal) => Some(match literal {
            Literal::Null => Scalar::Null,
            Literal::Bool(b) => Scalar::Bool(*b),
            Literal::Int(i) => Scalar::Int(*i),
            Literal::Float(f) => Scalar::Float(*f),
            Literal::Str(s) => Scalar::Str(s.clone()),
        }),
    }
}

/// Value of a field for one row, None when it is missing or not a scalar
fn resolve(field: &Field, key: &[u8], object: &Object) -> Option<Scalar> {
    match field {
        Field::Key => Some(Scalar::Str(String::from_utf8_lossy(key).into_owned())),
        Field::Value => match object.value() {
            Value::String(bytes) => Some(Scalar::Str(String::from_utf8_lossy(bytes).into_owned())),
            Value::Integer(i) => Some(Scalar::Int(*i)),
            Value::Json(doc) => json_scalar(doc),
            _ => None,
        },
        Field::Path(segments) => {
            let Value::Json(doc) = object.value() else {
                return None;
            };
            let mut current = doc;
            for segment in segments {
                current = match current {
                    serde_json::Value::Object(map) => map.get(segment)?,
                    serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
            json_scalar(current)
        }
    }
}

fn json_scalar(value: &serde_json::Value) -> Option<Scalar> {
    match value {
        serde_json::Value::Null => Some(Scalar::Null),
        serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Scalar::Int(i)),
            None => n.as_f64().map(Scalar::Float),
        },
        serde_json::Value::String(s) => Some(Scalar::Str(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

/// Missing operands and mismatched types never match
fn compare(left: Option<Scalar>, op: CompareOp, right: Option<Scalar>) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };

    match op {
        CompareOp::Like | CompareOp::NotLike => match (&left, &right) {
            (Scalar::Str(text), Scalar::Str(pattern)) => {
                glob_match(pattern.as_bytes(), text.as_bytes()) == (op == CompareOp::Like)
            }
            _ => false,
        },
        _ => match same_kind_order(&left, &right) {
            Some(ordering) => match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Like | CompareOp::NotLike => false,
            },
            None => false,
        },
    }
}

/// Order two scalars of the same kind; ints and floats are both numbers
fn same_kind_order(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    match (left, right) {
        (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
        (Scalar::Int(a), Scalar::Float(b)) => (*a as f64).partial_cmp(b),
        (Scalar::Float(a), Scalar::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order for ORDER BY: null < bool < number < string < missing
fn sort_order(left: Option<&Scalar>, right: Option<&Scalar>) -> Ordering {
    fn rank(value: Option<&Scalar>) -> u8 {
        match value {
            Some(Scalar::Null) => 0,
            Some(Scalar::Bool(_)) => 1,
            Some(Scalar::Int(_)) | Some(Scalar::Float(_)) => 2,
            Some(Scalar::Str(_)) => 3,
            None => 4,
        }
    }

    rank(left).cmp(&rank(right)).then_with(|| match (left, right) {
        (Some(a), Some(b)) => same_kind_order(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

/// Reply shape of a stored value inside a result row
fn render_value(value: &Value) -> RespValue {
    match value {
        Value::String(bytes) => RespValue::BulkString(bytes.clone()),
        Value::Integer(i) => RespValue::Integer(*i),
        Value::Json(doc) => RespValue::bulk_string(doc.to_string()),
        Value::List(items) => RespValue::Array(items.iter().cloned().map(RespValue::BulkString).collect()),
        Value::Set(members) => {
            let mut members: Vec<&Bytes> = members.iter().collect();
            members.sort();
            RespValue::Array(members.into_iter().cloned().map(RespValue::BulkString).collect())
        }
        Value::Hash(fields) => {
            let mut pairs: Vec<(&Bytes, &Bytes)> = fields.iter().collect();
            pairs.sort();
            RespValue::Array(
                pairs
                    .into_iter()
                    .flat_map(|(f, v)| [RespValue::BulkString(f.clone()), RespValue::BulkString(v.clone())])
                    .collect(),
            )
        }
        Value::SortedSet(zset) => RespValue::Array(
            zset.iter()
                .map(|(member, _)| RespValue::BulkString(member.clone()))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, value: Value) -> (Bytes, Object) {
        (Bytes::copy_from_slice(key.as_bytes()), Object::new(value))
    }

    fn keys(result: &QueryResult) -> Vec<&str> {
        result.keys.iter().map(|k| std::str::from_utf8(k).unwrap()).collect()
    }

    #[test]
    fn test_top_n_by_value() {
        let query = Query::parse("SELECT $key,$value WHERE $key LIKE 'm:*' ORDER BY $value DESC LIMIT 2").unwrap();
        let result = query.evaluate(vec![
            entry("m:x", Value::string("5")),
            entry("m:y", Value::string("10")),
            entry("m:z", Value::string("1")),
            entry("other", Value::string("100")),
        ]);

        assert_eq!(keys(&result), vec!["m:y", "m:x"]);
        assert_eq!(
            result.rows,
            RespValue::Array(vec![
                RespValue::Array(vec![RespValue::bulk_string("m:y"), RespValue::integer(10)]),
                RespValue::Array(vec![RespValue::bulk_string("m:x"), RespValue::integer(5)]),
            ])
        );
    }

    #[test]
    fn test_json_path_predicates() {
        let query = Query::parse("SELECT $key WHERE $value.age >= 18 AND $value.city = 'Lyon'").unwrap();
        let result = query.evaluate(vec![
            entry("u:1", Value::Json(json!({"age": 30, "city": "Lyon"}))),
            entry("u:2", Value::Json(json!({"age": 12, "city": "Lyon"}))),
            entry("u:3", Value::Json(json!({"age": 40.5, "city": "Paris"}))),
            entry("u:4", Value::Json(json!({"city": "Lyon"}))),
            entry("u:5", Value::string("not json")),
        ]);

        assert_eq!(keys(&result), vec!["u:1"]);
        assert_eq!(
            result.rows,
            RespValue::Array(vec![RespValue::Array(vec![RespValue::bulk_string("u:1")])])
        );
    }

    #[test]
    fn test_mismatched_types_never_match() {
        let row = entry("k", Value::string("abc"));
        let matches = |text: &str| Query::parse(text).unwrap().matches(&row.0, &row.1);

        assert!(!matches("SELECT $key WHERE $value > 1"));
        assert!(!matches("SELECT $key WHERE $value != 1"));
        assert!(matches("SELECT $key WHERE $value = 'abc'"));
        assert!(matches("SELECT $key WHERE NOT $value > 1"));
        assert!(matches("SELECT $key WHERE $value LIKE 'a?c'"));
        assert!(matches("SELECT $key WHERE $value NOT LIKE 'x*'"));
        assert!(!matches("SELECT $key WHERE $value.field = 'abc'"));
    }

    #[test]
    fn test_numbers_mix_ints_and_floats() {
        let row = entry("k", Value::Json(json!({"n": 2, "f": 2.5, "ok": true, "none": null})));
        let matches = |text: &str| Query::parse(text).unwrap().matches(&row.0, &row.1);

        assert!(matches("SELECT $key WHERE $value.n = 2.0"));
        assert!(matches("SELECT $key WHERE $value.f > 2"));
        assert!(matches("SELECT $key WHERE $value.ok = TRUE"));
        assert!(matches("SELECT $key WHERE $value.none = NULL"));
        assert!(!matches("SELECT $key WHERE $value.n = '2'"));
    }

    #[test]
    fn test_order_across_types_and_missing_paths() {
        let query = Query::parse("SELECT $key ORDER BY $value.rank").unwrap();
        let result = query.evaluate(vec![
            entry("e", Value::Json(json!({}))),
            entry("d", Value::Json(json!({"rank": "top"}))),
            entry("c", Value::Json(json!({"rank": 3}))),
            entry("b", Value::Json(json!({"rank": true}))),
            entry("a", Value::Json(json!({"rank": null}))),
            entry("f", Value::Json(json!({"rank": 1.5}))),
        ]);
        assert_eq!(keys(&result), vec!["a", "b", "f", "c", "d", "e"]);
    }

    #[test]
    fn test_ties_keep_key_order() {
        let query = Query::parse("SELECT $key ORDER BY $value DESC").unwrap();
        let result = query.evaluate(vec![
            entry("c", Value::string("1")),
            entry("a", Value::string("1")),
            entry("b", Value::string("2")),
        ]);
        assert_eq!(keys(&result), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rows_render_collections() {
        let query = Query::parse("SELECT $value").unwrap();
        let mut set = std::collections::HashSet::new();
        set.insert(Bytes::from("y"));
        set.insert(Bytes::from("x"));
        let result = query.evaluate(vec![entry("s", Value::Set(set))]);
        assert_eq!(
            result.rows,
            RespValue::Array(vec![RespValue::Array(vec![RespValue::Array(vec![
                RespValue::bulk_string("x"),
                RespValue::bulk_string("y"),
            ])])])
        );
    }
}
