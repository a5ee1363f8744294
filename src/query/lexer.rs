//! Tokenizer for watch queries
//!
//! Walks the query text with a byte cursor. Every token carries the byte
//! offset it started at so parse errors can point into the query.

use super::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// Bare word: keyword or identifier, compared case-insensitively
    Word(String),
    /// `$key`, `$value` or `$value.path`
    Field(String),
    Str(String),
    Int(i64),
    Float(f64),
    Comma,
    Star,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Token {
    /// Rendering used in error messages
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Field(f) => f.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Comma => ",".to_string(),
            Token::Star => "*".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Eq => "=".to_string(),
            Token::Ne => "!=".to_string(),
            Token::Lt => "<".to_string(),
            Token::Le => "<=".to_string(),
            Token::Gt => ">".to_string(),
            Token::Ge => ">=".to_string(),
        }
    }

    /// True for a bare word equal to `keyword`, ignoring case
    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Spanned>, QueryError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let b = bytes[pos];

        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let token = match b {
            b',' => {
                pos += 1;
                Token::Comma
            }
            b'*' => {
                pos += 1;
                Token::Star
            }
            b'(' => {
                pos += 1;
                Token::LParen
            }
            b')' => {
                pos += 1;
                Token::RParen
            }
            b'=' => {
                pos += if bytes.get(pos + 1) == Some(&b'=') { 2 } else { 1 };
                Token::Eq
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                Token::Ne
            }
            b'<' => match bytes.get(pos + 1) {
                Some(b'=') => {
                    pos += 2;
                    Token::Le
                }
                Some(b'>') => {
                    pos += 2;
                    Token::Ne
                }
                _ => {
                    pos += 1;
                    Token::Lt
                }
            },
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::Ge
                } else {
                    pos += 1;
                    Token::Gt
                }
            }
            b'\'' | b'"' => {
                let (s, next) = read_string(text, pos)?;
                pos = next;
                Token::Str(s)
            }
            b'$' => {
                pos += 1;
                while pos < bytes.len() && is_path_byte(bytes[pos]) {
                    pos += 1;
                }
                Token::Field(text[start..pos].to_string())
            }
            b'-' | b'0'..=b'9' => {
                let (token, next) = read_number(text, pos)?;
                pos = next;
                token
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                    pos += 1;
                }
                Token::Word(text[start..pos].to_string())
            }
            _ => {
                let ch = text[pos..].chars().next().unwrap_or('?');
                return Err(QueryError::UnexpectedChar { ch, position: pos });
            }
        };

        tokens.push(Spanned { token, position: start });
    }

    Ok(tokens)
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

/// Read a quoted string starting at the opening quote; `\` escapes the next char
fn read_string(text: &str, start: usize) -> Result<(String, usize), QueryError> {
    let quote = text.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = text[start + 1..].char_indices();

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((out, start + 1 + offset + c.len_utf8())),
            c => out.push(c),
        }
    }

    Err(QueryError::UnterminatedString { position: start })
}

fn read_number(text: &str, start: usize) -> Result<(Token, usize), QueryError> {
    let bytes = text.as_bytes();
    let mut pos = start;
    if bytes[pos] == b'-' {
        pos += 1;
    }
    let digits_start = pos;
    let mut is_float = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'0'..=b'9' => pos += 1,
            b'.' | b'e' | b'E' => {
                is_float = true;
                pos += 1;
                if pos < bytes.len() && matches!(bytes[pos], b'-' | b'+') && matches!(bytes[pos - 1], b'e' | b'E') {
                    pos += 1;
                }
            }
            _ => break,
        }
    }

    let literal = &text[start..pos];
    let invalid = || QueryError::InvalidNumber { text: literal.to_string(), position: start };
    if pos == digits_start {
        return Err(invalid());
    }

    let token = if is_float {
        Token::Float(literal.parse().map_err(|_| invalid())?)
    } else {
        Token::Int(literal.parse().map_err(|_| invalid())?)
    };
    Ok((token, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokenize_query() {
        assert_eq!(
            kinds("SELECT $key, $value.age WHERE $value.age >= 18 LIMIT 5"),
            vec![
                Token::Word("SELECT".into()),
                Token::Field("$key".into()),
                Token::Comma,
                Token::Field("$value.age".into()),
                Token::Word("WHERE".into()),
                Token::Field("$value.age".into()),
                Token::Ge,
                Token::Int(18),
                Token::Word("LIMIT".into()),
                Token::Int(5),
            ]
        );
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("<> != <= < > = -3 2.5 'it\\'s' \"dq\""),
            vec![
                Token::Ne,
                Token::Ne,
                Token::Le,
                Token::Lt,
                Token::Gt,
                Token::Eq,
                Token::Int(-3),
                Token::Float(2.5),
                Token::Str("it's".into()),
                Token::Str("dq".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a  'b'").unwrap();
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[1].position, 3);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            tokenize("SELECT 'open"),
            Err(QueryError::UnterminatedString { position: 7 })
        );
        assert_eq!(
            tokenize("SELECT #"),
            Err(QueryError::UnexpectedChar { ch: '#', position: 7 })
        );
        assert!(matches!(tokenize("- x"), Err(QueryError::InvalidNumber { .. })));
    }
}
