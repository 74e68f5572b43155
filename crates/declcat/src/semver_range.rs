//! Semantic-version ranges.
//!
//! Ranges use the grammar found in `olm.skipRange` and `olm.package.required`
//! values: whitespace-separated comparators must all match, and `||`
//! separates alternatives.
//!
//! ```text
//! >=1.0.0 <2.0.0
//! <1.2.3 || >=2.0.0
//! 1.x
//! !=1.4.0
//! ```

use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing a version range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("version range must not be empty")]
    Empty,

    #[error("invalid comparator '{comparator}': {reason}")]
    InvalidComparator { comparator: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "=" | "==" => Some(Self::Eq),
            "!" | "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, major: u64, minor: u64) -> Self {
        Self {
            op,
            version: Version::new(major, minor, 0),
        }
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = precedence(version, &self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

/// Semantic version precedence; build metadata does not participate.
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// A parsed version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// Parse a range expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is empty or any comparator is malformed.
    pub fn parse(s: &str) -> Result<Self, RangeError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RangeError::Empty);
        }

        let mut alternatives = Vec::new();
        for part in trimmed.split("||") {
            let tokens = join_operators(part);
            if tokens.is_empty() {
                return Err(RangeError::InvalidComparator {
                    comparator: part.trim().to_string(),
                    reason: "empty alternative".to_string(),
                });
            }
            let mut comparators = Vec::new();
            for token in &tokens {
                comparators.extend(parse_comparator(token)?);
            }
            alternatives.push(comparators);
        }

        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }

    /// Returns true if `version` satisfies the range.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }

    /// The range expression as it was written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!')
}

/// Split an alternative into comparator tokens, gluing a bare operator
/// (`>= 1.0.0`) to the version that follows it.
fn join_operators(part: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending: Option<&str> = None;
    for word in part.split_whitespace() {
        if let Some(op) = pending.take() {
            tokens.push(format!("{op}{word}"));
        } else if word.chars().all(is_operator_char) {
            pending = Some(word);
        } else {
            tokens.push(word.to_string());
        }
    }
    if let Some(op) = pending {
        tokens.push(op.to_string());
    }
    tokens
}

fn invalid(token: &str, reason: impl Into<String>) -> RangeError {
    RangeError::InvalidComparator {
        comparator: token.to_string(),
        reason: reason.into(),
    }
}

fn is_wildcard(s: &str) -> bool {
    matches!(s, "x" | "X" | "*")
}

fn parse_comparator(token: &str) -> Result<Vec<Comparator>, RangeError> {
    let split = token
        .char_indices()
        .find(|(_, c)| !is_operator_char(*c))
        .map_or(token.len(), |(i, _)| i);
    let (op_str, version_str) = token.split_at(split);

    let op = Op::parse(op_str).ok_or_else(|| invalid(token, format!("unknown operator '{op_str}'")))?;
    if version_str.is_empty() {
        return Err(invalid(token, "missing version"));
    }

    let parts: Vec<&str> = version_str.split('.').collect();
    if !parts.iter().any(|p| is_wildcard(p)) {
        let version = Version::parse(version_str).map_err(|e| invalid(token, e.to_string()))?;
        return Ok(vec![Comparator { op, version }]);
    }

    expand_wildcard(token, op, &parts)
}

/// Rewrite `1.x`, `1.2.x` and `*` into plain comparators.
fn expand_wildcard(token: &str, op: Op, parts: &[&str]) -> Result<Vec<Comparator>, RangeError> {
    if parts.len() > 3 {
        return Err(invalid(token, "too many version components"));
    }

    if is_wildcard(parts[0]) {
        if parts[1..].iter().any(|p| !is_wildcard(p)) {
            return Err(invalid(token, "numeric component after wildcard"));
        }
        return match op {
            Op::Eq | Op::Ge | Op::Le => Ok(Vec::new()),
            _ => Err(invalid(token, "operator cannot be used with a full wildcard")),
        };
    }

    let number = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| invalid(token, format!("invalid version component '{s}'")))
    };
    let major = number(parts[0])?;
    let next = |n: u64| {
        n.checked_add(1)
            .ok_or_else(|| invalid(token, format!("version component {n} is too large")))
    };

    // (lower, upper) bounds of the wildcard interval.
    let (lower, upper) = match parts.get(1) {
        None => return Err(invalid(token, "incomplete version")),
        Some(p) if is_wildcard(p) => {
            if parts.get(2).is_some_and(|p| !is_wildcard(p)) {
                return Err(invalid(token, "numeric component after wildcard"));
            }
            ((major, 0), (next(major)?, 0))
        }
        Some(p) => {
            let minor = number(p)?;
            match parts.get(2) {
                Some(p) if is_wildcard(p) => ((major, minor), (major, next(minor)?)),
                _ => return Err(invalid(token, "incomplete version")),
            }
        }
    };

    let comparators = match op {
        Op::Eq => vec![
            Comparator::new(Op::Ge, lower.0, lower.1),
            Comparator::new(Op::Lt, upper.0, upper.1),
        ],
        Op::Ge => vec![Comparator::new(Op::Ge, lower.0, lower.1)],
        Op::Gt => vec![Comparator::new(Op::Ge, upper.0, upper.1)],
        Op::Lt => vec![Comparator::new(Op::Lt, lower.0, lower.1)],
        Op::Le => vec![Comparator::new(Op::Lt, upper.0, upper.1)],
        Op::Ne => return Err(invalid(token, "'!=' cannot be used with a wildcard")),
    };
    Ok(comparators)
}
