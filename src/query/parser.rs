//! Recursive descent parser for watch queries
//!
//! Precedence, lowest first: OR, AND, NOT, comparison.

use super::lexer::{tokenize, Spanned, Token};
use super::{
    to_dnf, CompareOp, Direction, Field, Literal, Operand, OrderBy, Predicate, Query, QueryError, Selection,
    MAX_CONDITIONS, MAX_NESTING,
};

pub(crate) fn parse(text: &str) -> Result<Query, QueryError> {
    let mut parser = Parser { tokens: tokenize(text)?, pos: 0, depth: 0, conditions: 0 };
    let query = parser.query()?;
    if let Some(spanned) = parser.peek() {
        return Err(parser.unexpected(spanned.clone(), "end of query"));
    }
    if let Some(predicate) = &query.predicate {
        to_dnf(predicate)?;
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Open parentheses and NOTs around the current position
    depth: usize,
    conditions: usize,
}

impl Parser {
    fn query(&mut self) -> Result<Query, QueryError> {
        self.expect_keyword("SELECT")?;
        let selection = self.selection()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.or_expr()?)
        } else {
            None
        };

        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let field = match self.next("field")? {
                Spanned { token: Token::Field(name), position } => parse_field(&name, position)?,
                Spanned { token: Token::Str(s), position } if s.starts_with("$value.") => parse_field(&s, position)?,
                Spanned { token: Token::Str(_) | Token::Int(_) | Token::Float(_), .. } => {
                    return Err(QueryError::OrderByLiteral)
                }
                other => return Err(self.unexpected(other, "field")),
            };
            let direction = if self.eat_keyword("DESC") {
                Direction::Desc
            } else {
                self.eat_keyword("ASC");
                Direction::Asc
            };
            Some(OrderBy { field, direction })
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            match self.next("integer")? {
                Spanned { token: Token::Int(n), .. } if n > 0 => Some(n as usize),
                Spanned { token: Token::Int(_), .. } => return Err(QueryError::InvalidLimit),
                other => return Err(self.unexpected(other, "integer")),
            }
        } else {
            None
        };

        Ok(Query { selection, predicate, order_by, limit })
    }

    fn selection(&mut self) -> Result<Selection, QueryError> {
        let mut selection = Selection { key: false, value: false };

        if self.peek().map(|s| &s.token) == Some(&Token::Star) {
            self.pos += 1;
            return Ok(Selection { key: true, value: true });
        }

        loop {
            match self.next("$key or $value")? {
                Spanned { token: Token::Field(name), .. } if name == "$key" => selection.key = true,
                Spanned { token: Token::Field(name), .. } if name == "$value" => selection.value = true,
                other => return Err(self.unexpected(other, "$key or $value")),
            }
            if self.peek().map(|s| &s.token) != Some(&Token::Comma) {
                break;
            }
            self.pos += 1;
        }

        Ok(selection)
    }

    fn or_expr(&mut self) -> Result<Predicate, QueryError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Predicate, QueryError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Predicate, QueryError> {
        if self.eat_keyword("NOT") {
            self.enter()?;
            let inner = self.not_expr()?;
            self.depth -= 1;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        if self.peek().map(|s| &s.token) == Some(&Token::LParen) {
            self.pos += 1;
            self.enter()?;
            let inner = self.or_expr()?;
            self.depth -= 1;
            match self.next(")")? {
                Spanned { token: Token::RParen, .. } => return Ok(inner),
                other => return Err(self.unexpected(other, ")")),
            }
        }
        self.comparison()
    }

    fn enter(&mut self) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(QueryError::TooDeep { max: MAX_NESTING });
        }
        Ok(())
    }

    fn comparison(&mut self) -> Result<Predicate, QueryError> {
        self.conditions += 1;
        if self.conditions > MAX_CONDITIONS {
            return Err(QueryError::TooManyConditions { max: MAX_CONDITIONS });
        }
        let left = self.operand()?;
        let op = match self.next("comparison operator")? {
            Spanned { token: Token::Eq, .. } => CompareOp::Eq,
            Spanned { token: Token::Ne, .. } => CompareOp::Ne,
            Spanned { token: Token::Lt, .. } => CompareOp::Lt,
            Spanned { token: Token::Le, .. } => CompareOp::Le,
            Spanned { token: Token::Gt, .. } => CompareOp::Gt,
            Spanned { token: Token::Ge, .. } => CompareOp::Ge,
            spanned if spanned.token.is_keyword("LIKE") => CompareOp::Like,
            spanned if spanned.token.is_keyword("NOT") => {
                self.expect_keyword("LIKE")?;
                CompareOp::NotLike
            }
            other => return Err(self.unexpected(other, "comparison operator")),
        };
        let right = self.operand()?;
        Ok(Predicate::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, QueryError> {
        let Spanned { token, position } = self.next("field or literal")?;
        let operand = match token {
            Token::Field(name) => Operand::Field(parse_field(&name, position)?),
            // Quoted JSON paths, as in '$value.address.city'
            Token::Str(s) if s.starts_with("$value.") => Operand::Field(parse_field(&s, position)?),
            Token::Str(s) => Operand::Literal(Literal::Str(s)),
            Token::Int(i) => Operand::Literal(Literal::Int(i)),
            Token::Float(f) => Operand::Literal(Literal::Float(f)),
            ref t if t.is_keyword("NULL") => Operand::Literal(Literal::Null),
            ref t if t.is_keyword("TRUE") => Operand::Literal(Literal::Bool(true)),
            ref t if t.is_keyword("FALSE") => Operand::Literal(Literal::Bool(false)),
            other => return Err(self.unexpected(Spanned { token: other, position }, "field or literal")),
        };
        Ok(operand)
    }

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<Spanned, QueryError> {
        let spanned = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(QueryError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(spanned)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |s| s.token.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> Result<(), QueryError> {
        match self.next(keyword)? {
            spanned if spanned.token.is_keyword(keyword) => Ok(()),
            other => Err(self.unexpected(other, keyword)),
        }
    }

    fn unexpected(&self, spanned: Spanned, expected: &'static str) -> QueryError {
        QueryError::UnexpectedToken {
            expected,
            found: spanned.token.describe(),
            position: spanned.position,
        }
    }
}

/// `$key`, `$value` or `$value.a.b`
fn parse_field(name: &str, position: usize) -> Result<Field, QueryError> {
    match name {
        "$key" => Ok(Field::Key),
        "$value" => Ok(Field::Value),
        _ => {
            let path = name
                .strip_prefix("$value.")
                .ok_or_else(|| QueryError::UnknownField(name.to_string()))?;
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(QueryError::UnexpectedToken {
                    expected: "field path",
                    found: name.to_string(),
                    position,
                });
            }
            Ok(Field::Path(segments))
        }
    }
}
