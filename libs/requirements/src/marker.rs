//! Environment marker syntax.
//!
//! Markers such as `python_version >= "3.8" and os_name == "posix"` are
//! checked against the marker grammar only. Evaluating them is left to the
//! installer inside the worker.

use crate::error::ParseError;

const VARIABLES: &[&str] = &[
    "python_version",
    "python_full_version",
    "os_name",
    "sys_platform",
    "platform_release",
    "platform_system",
    "platform_version",
    "platform_machine",
    "platform_python_implementation",
    "implementation_name",
    "implementation_version",
    "extra",
    // Legacy dotted spellings still accepted by installers.
    "os.name",
    "sys.platform",
    "platform.version",
    "platform.machine",
    "platform.python_implementation",
    "python_implementation",
];

// Longest first.
const COMPARISONS: &[&str] = &["===", "==", "!=", "<=", ">=", "~=", "<", ">"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Variable,
    Literal,
    Comparison,
    And,
    Or,
    In,
    Not,
}

/// Check `marker` against the environment marker grammar.
pub(crate) fn validate(marker: &str) -> Result<(), ParseError> {
    let invalid = |reason: &'static str| ParseError::InvalidMarker {
        marker: marker.to_string(),
        reason,
    };

    let tokens = tokenize(marker).map_err(invalid)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.or_expr().map_err(invalid)?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid("unexpected trailing input"));
    }
    Ok(())
}

fn tokenize(marker: &str) -> Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut chars = marker.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '\'' => {
                chars.next();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    if ch == '\\' || ch.is_control() {
                        return Err("unsupported character in quoted string");
                    }
                }
                if !closed {
                    return Err("unterminated quoted string");
                }
                tokens.push(Token::Literal);
            }
            '=' | '!' | '<' | '>' | '~' => {
                let op = COMPARISONS
                    .iter()
                    .find(|op| marker[start..].starts_with(**op))
                    .ok_or("unknown comparison operator")?;
                for _ in 0..op.len() {
                    chars.next();
                }
                tokens.push(Token::Comparison);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let end = marker[start..]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                    .map_or(marker.len(), |len| start + len);
                while chars.peek().is_some_and(|&(i, _)| i < end) {
                    chars.next();
                }
                tokens.push(match &marker[start..end] {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::In,
                    "not" => Token::Not,
                    word if VARIABLES.contains(&word) => Token::Variable,
                    _ => return Err("unknown marker variable"),
                });
            }
            _ => return Err("unexpected character"),
        }
    }

    Ok(tokens)
}

/// Recursive descent over `or_expr := and_expr ('or' and_expr)*`,
/// `and_expr := atom ('and' atom)*`, `atom := '(' or_expr ')' | value op value`.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<(), &'static str> {
        self.and_expr()?;
        while self.eat(Token::Or) {
            self.and_expr()?;
        }
        Ok(())
    }

    fn and_expr(&mut self) -> Result<(), &'static str> {
        self.atom()?;
        while self.eat(Token::And) {
            self.atom()?;
        }
        Ok(())
    }

    fn atom(&mut self) -> Result<(), &'static str> {
        if self.eat(Token::Open) {
            self.or_expr()?;
            return if self.eat(Token::Close) {
                Ok(())
            } else {
                Err("unbalanced parenthesis")
            };
        }

        self.value()?;
        match self.peek() {
            Some(Token::Comparison | Token::In) => self.pos += 1,
            Some(Token::Not) => {
                self.pos += 1;
                if !self.eat(Token::In) {
                    return Err("expected 'in' after 'not'");
                }
            }
            _ => return Err("expected a comparison operator"),
        }
        self.value()
    }

    fn value(&mut self) -> Result<(), &'static str> {
        match self.peek() {
            Some(Token::Variable | Token::Literal) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err("expected a marker variable or quoted string"),
        }
    }
}
