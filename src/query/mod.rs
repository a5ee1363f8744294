//! Watch query language
//!
//! `SELECT $key, $value [WHERE <predicate>] [ORDER BY <field> [ASC|DESC]] [LIMIT n]`
//!
//! A query is parsed once at subscribe time into a [`Query`], then evaluated
//! against a snapshot of the keyspace every time a mutation may affect it.
//! Two queries that differ only in the order of their AND/OR terms share the
//! same canonical text, and therefore the same fingerprint.

mod eval;
mod lexer;
mod parser;

pub use eval::QueryResult;

use crate::glob::glob_match;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a query
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    #[error("expected {expected} at position {position}, found '{found}'")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("expected {expected} at end of query")]
    UnexpectedEnd { expected: &'static str },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("LIMIT must be a positive integer")]
    InvalidLimit,

    #[error("ORDER BY requires a field")]
    OrderByLiteral,

    #[error("query nests deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("query has more than {max} conditions")]
    TooManyConditions { max: usize },

    #[error("query expands to more than {max} OR terms")]
    TooComplex { max: usize },
}

/// Deepest accepted nesting of parentheses and NOT
pub const MAX_NESTING: usize = 64;

/// Most comparisons accepted in one WHERE clause
pub const MAX_CONDITIONS: usize = 128;

/// Most conjunctions the canonical form of a WHERE clause may expand to
pub const MAX_DNF_TERMS: usize = 1024;

/// A column of a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Key,
    Value,
    /// Dotted path into a JSON value, without the leading `$value`
    Path(Vec<String>),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Key => write!(f, "$key"),
            Field::Value => write!(f, "$value"),
            Field::Path(segments) => write!(f, "$value.{}", segments.join(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(Field),
    Literal(Literal),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(field) => field.fmt(f),
            Operand::Literal(literal) => literal.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { left, op, right } => write!(f, "{} {} {}", left, op.as_str(), right),
            Predicate::And(a, b) => write!(f, "({} AND {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} OR {})", a, b),
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

/// Which fields each result row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub key: bool,
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: Field,
    pub direction: Direction,
}

/// A parsed query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selection: Selection,
    pub predicate: Option<Predicate>,
    pub order_by: Option<OrderBy>,
    /// None = unbounded
    pub limit: Option<usize>,
}

/// Conjunction of atoms, each atom rendered as canonical text
type Conjunction = BTreeSet<String>;

impl Query {
    pub fn parse(text: &str) -> Result<Query, QueryError> {
        parser::parse(text)
    }

    /// Canonical text: identical for queries that only differ in term order,
    /// keyword case or whitespace
    pub fn canonical(&self) -> String {
        let mut out = String::from("SELECT ");
        out.push_str(match (self.selection.key, self.selection.value) {
            (true, true) => "$key,$value",
            (true, false) => "$key",
            _ => "$value",
        });

        if let Some(predicate) = &self.predicate {
            out.push_str(" WHERE ");
            match to_dnf(predicate) {
                Ok(conjunctions) => {
                    let terms: BTreeSet<String> = conjunctions
                        .into_iter()
                        .map(|conjunction| conjunction.into_iter().collect::<Vec<_>>().join(" AND "))
                        .collect();
                    out.push_str(&terms.into_iter().collect::<Vec<_>>().join(" OR "));
                }
                // Only hand-built queries get here; parsed ones are bounded
                Err(_) => out.push_str(&predicate.to_string()),
            }
        }

        if let Some(order) = &self.order_by {
            out.push_str(&format!(" ORDER BY {}", order.field));
            if order.direction == Direction::Desc {
                out.push_str(" DESC");
            }
        }

        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {}", limit));
        }
        out
    }

    /// Glob narrowing the scan, from a top-level `$key LIKE 'pattern'` conjunct
    pub fn scan_pattern(&self) -> Option<Bytes> {
        fn find(predicate: &Predicate) -> Option<&str> {
            match predicate {
                Predicate::Compare {
                    left: Operand::Field(Field::Key),
                    op: CompareOp::Like,
                    right: Operand::Literal(Literal::Str(pattern)),
                } => Some(pattern),
                Predicate::And(a, b) => find(a).or_else(|| find(b)),
                _ => None,
            }
        }

        self.predicate
            .as_ref()
            .and_then(find)
            .map(|pattern| Bytes::copy_from_slice(pattern.as_bytes()))
    }

    /// Whether `key` can ever appear in the result
    pub fn in_scope(&self, key: &[u8]) -> bool {
        match self.scan_pattern() {
            Some(pattern) => glob_match(&pattern, key),
            None => true,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Disjunctive normal form with negations pushed down to the atoms
///
/// Fails once the expansion would exceed [`MAX_DNF_TERMS`] conjunctions.
fn to_dnf(predicate: &Predicate) -> Result<Vec<Conjunction>, QueryError> {
    dnf(predicate, false)
}

fn dnf(predicate: &Predicate, negated: bool) -> Result<Vec<Conjunction>, QueryError> {
    let too_complex = QueryError::TooComplex { max: MAX_DNF_TERMS };

    match (predicate, negated) {
        (Predicate::Compare { left, op, right }, _) => {
            let atom = format!("{} {} {}", left, op.as_str(), right);
            let atom = if negated { format!("NOT {}", atom) } else { atom };
            Ok(vec![BTreeSet::from([atom])])
        }
        (Predicate::Not(inner), _) => dnf(inner, !negated),
        (Predicate::And(a, b), false) | (Predicate::Or(a, b), true) => {
            let (left, right) = (dnf(a, negated)?, dnf(b, negated)?);
            if left.len().saturating_mul(right.len()) > MAX_DNF_TERMS {
                return Err(too_complex);
            }
            let mut product = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    product.push(l.union(r).cloned().collect());
                }
            }
            Ok(dedup(product))
        }
        (Predicate::Or(a, b), false) | (Predicate::And(a, b), true) => {
            let mut terms = dnf(a, negated)?;
            terms.extend(dnf(b, negated)?);
            if terms.len() > MAX_DNF_TERMS {
                return Err(too_complex);
            }
            Ok(dedup(terms))
        }
    }
}

fn dedup(terms: Vec<Conjunction>) -> Vec<Conjunction> {
    let unique: BTreeSet<Conjunction> = terms.into_iter().collect();
    unique.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(text: &str) -> String {
        Query::parse(text).unwrap().canonical()
    }

    #[test]
    fn test_term_order_does_not_matter() {
        assert_eq!(
            canonical("SELECT $key,$value WHERE $value > 1 AND $key LIKE 'a*'"),
            canonical("select $key, $value where $key like 'a*' and $value > 1")
        );
        assert_eq!(
            canonical("SELECT $key WHERE $value = 1 OR $value = 2"),
            canonical("SELECT $key WHERE $value = 2 OR $value = 1")
        );
    }

    #[test]
    fn test_dnf_distributes_and_over_or() {
        assert_eq!(
            canonical("SELECT $key WHERE $value = 1 AND ($key = 'a' OR $key = 'b')"),
            "SELECT $key WHERE $key = 'a' AND $value = 1 OR $key = 'b' AND $value = 1"
        );
    }

    #[test]
    fn test_negation_pushed_to_atoms() {
        assert_eq!(
            canonical("SELECT $key WHERE NOT ($value = 1 OR $value = 2)"),
            "SELECT $key WHERE NOT $value = 1 AND NOT $value = 2"
        );
        assert_eq!(
            canonical("SELECT $key WHERE NOT NOT $value = 1"),
            canonical("SELECT $key WHERE $value = 1")
        );
    }

    #[test]
    fn test_duplicate_terms_collapse() {
        assert_eq!(
            canonical("SELECT $key WHERE $value = 1 AND $value = 1"),
            canonical("SELECT $key WHERE $value = 1")
        );
    }

    #[test]
    fn test_canonical_carries_order_and_limit() {
        assert_eq!(
            canonical("SELECT * ORDER BY $value desc LIMIT 3"),
            "SELECT $key,$value ORDER BY $value DESC LIMIT 3"
        );
        assert_ne!(
            canonical("SELECT $key ORDER BY $value DESC"),
            canonical("SELECT $key ORDER BY $value ASC")
        );
    }

    #[test]
    fn test_expansion_is_bounded() {
        // Ten two-way ORs joined by AND expand to 1024 conjunctions
        let clause = |i: usize| format!("($value = {} OR $key = 'k{}')", i, i);
        let fits: Vec<String> = (0..10).map(clause).collect();
        let query = Query::parse(&format!("SELECT $key WHERE {}", fits.join(" AND "))).unwrap();
        assert_eq!(query.canonical().matches(" OR ").count(), MAX_DNF_TERMS - 1);

        let too_many: Vec<String> = (0..18).map(clause).collect();
        assert_eq!(
            Query::parse(&format!("SELECT $key WHERE {}", too_many.join(" AND "))),
            Err(QueryError::TooComplex { max: MAX_DNF_TERMS })
        );
    }

    #[test]
    fn test_unbounded_predicate_falls_back_to_tree_text() {
        let atom = |i: i64| Predicate::Compare {
            left: Operand::Field(Field::Value),
            op: CompareOp::Eq,
            right: Operand::Literal(Literal::Int(i)),
        };
        let mut predicate = Predicate::Or(Box::new(atom(0)), Box::new(atom(1)));
        for i in 1..12 {
            let clause = Predicate::Or(Box::new(atom(2 * i)), Box::new(atom(2 * i + 1)));
            predicate = Predicate::And(Box::new(predicate), Box::new(clause));
        }
        let query = Query {
            selection: Selection { key: true, value: false },
            predicate: Some(predicate),
            order_by: None,
            limit: None,
        };
        let text = query.canonical();
        assert!(text.starts_with("SELECT $key WHERE ("));
        assert!(text.contains("(($value = 0 OR $value = 1) AND ($value = 2 OR $value = 3))"));
        assert!(text.len() < 1024);
    }

    #[test]
    fn test_scan_pattern() {
        let query = Query::parse("SELECT $key WHERE $value > 1 AND $key LIKE 'user:*'").unwrap();
        assert_eq!(query.scan_pattern(), Some(Bytes::from("user:*")));
        assert!(query.in_scope(b"user:7"));
        assert!(!query.in_scope(b"order:7"));

        let query = Query::parse("SELECT $key WHERE $key LIKE 'a*' OR $value > 1").unwrap();
        assert_eq!(query.scan_pattern(), None);
        assert!(query.in_scope(b"anything"));
    }
}
