//! Syntax of a single requirement line.
//!
//! Accepted shape: `name [extras] [specifiers] [; marker]` or
//! `name [extras] @ url [; marker]`, where specifiers are comma separated
//! `<op> version` clauses, optionally wrapped in parentheses.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::marker;

/// Version comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<=`
    LessEqual,
    /// `>=`
    GreaterEqual,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `~=`
    Compatible,
    /// `===`
    ArbitraryEqual,
}

impl Operator {
    // Longest first, so `===` is not read as `==` followed by `=1.0`.
    const PREFIXES: [(&'static str, Operator); 8] = [
        ("===", Operator::ArbitraryEqual),
        ("~=", Operator::Compatible),
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        ("<=", Operator::LessEqual),
        (">=", Operator::GreaterEqual),
        ("<", Operator::Less),
        (">", Operator::Greater),
    ];

    /// The operator as written in a requirement line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::Compatible => "~=",
            Operator::ArbitraryEqual => "===",
        }
    }

    fn split_prefix(clause: &str) -> Option<(Operator, &str)> {
        Self::PREFIXES
            .iter()
            .find_map(|(prefix, op)| clause.strip_prefix(prefix).map(|rest| (*op, rest)))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<op> version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub operator: Operator,
    pub version: String,
}

impl Specifier {
    /// Returns true for prefix matches such as `==3.*`.
    pub fn is_wildcard(&self) -> bool {
        self.version.ends_with(".*")
    }

    fn parse(clause: &str) -> Result<Self, ParseError> {
        let clause = clause.trim();
        let (operator, version) = Operator::split_prefix(clause)
            .ok_or_else(|| ParseError::MissingOperator(clause.to_string()))?;

        let version = version.trim();
        if version.is_empty() {
            return Err(ParseError::MissingVersion(operator));
        }
        if !is_valid_version(version, operator) {
            return Err(ParseError::InvalidVersion(version.to_string()));
        }

        Ok(Self {
            operator,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}

/// A parsed requirement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    name: String,
    extras: Vec<String>,
    specifiers: Vec<Specifier>,
    url: Option<String>,
    marker: Option<String>,
}

impl Requirement {
    /// Parse one requirement line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();

        let (body, marker) = match line.split_once(';') {
            Some((body, marker)) => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err(ParseError::EmptyMarker);
                }
                marker::validate(marker)?;
                (body.trim(), Some(marker.to_string()))
            }
            None => (line, None),
        };

        let name_end = body
            .find(|c: char| !is_name_char(c))
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty() {
            return Err(ParseError::EmptyName);
        }
        if !is_valid_name(name) {
            return Err(ParseError::InvalidName(name.to_string()));
        }

        let mut rest = body[name_end..].trim_start();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or(ParseError::UnterminatedExtras)?;
            for extra in after[..close].split(',').map(str::trim) {
                if extra.is_empty() {
                    continue;
                }
                if !is_valid_name(extra) {
                    return Err(ParseError::InvalidExtra(extra.to_string()));
                }
                extras.push(extra.to_string());
            }
            rest = after[close + 1..].trim_start();
        }

        if let Some(url) = rest.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() {
                return Err(ParseError::MissingUrl);
            }
            if !is_valid_url(url) {
                return Err(ParseError::InvalidUrl(url.to_string()));
            }
            return Ok(Self {
                name: name.to_string(),
                extras,
                specifiers: Vec::new(),
                url: Some(url.to_string()),
                marker,
            });
        }

        let rest = rest
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
            .unwrap_or(rest)
            .trim();

        let specifiers = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',')
                .map(Specifier::parse)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            name: name.to_string(),
            extras,
            specifiers,
            url: None,
            marker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    pub fn specifiers(&self) -> &[Specifier] {
        &self.specifiers
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl FromStr for Requirement {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && name.chars().all(is_name_char)
        }
        _ => false,
    }
}

/// `scheme://host/...`, or `file:///path`, with no whitespace anywhere.
fn is_valid_url(url: &str) -> bool {
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    let Some((scheme, rest)) = url.split_once(':') else {
        return false;
    };
    let scheme_ok = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok {
        return false;
    }

    match rest.strip_prefix("//") {
        Some(_) if scheme.eq_ignore_ascii_case("file") => true,
        Some(authority) => authority
            .split(['/', '?', '#'])
            .next()
            .is_some_and(|host| !host.is_empty()),
        None => false,
    }
}

fn is_valid_version(version: &str, operator: Operator) -> bool {
    if version.chars().any(char::is_whitespace) {
        return false;
    }
    // `===` compares strings verbatim.
    if operator == Operator::ArbitraryEqual {
        return true;
    }

    let (core, wildcard) = match version.strip_suffix(".*") {
        Some(core) => (core, true),
        None => (version, false),
    };
    if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
        return false;
    }

    core.starts_with(|c: char| c.is_ascii_alphanumeric())
        && core
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '!' | '_' | '-'))
}
