use std::str::FromStr;

use weft_core::error::WeftError;
use weft_core::state::StateStore;

/// Comparison operator for numeric conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Ge,
    Gt,
    Le,
    Lt,
}

/// A loop exit condition over structured state, parsed once at build time.
///
/// Supported expressions:
/// - `key == "value"`: rendered value equals
/// - `key != "value"`: rendered value differs (key must be set)
/// - `key contains "substr"`: substring match on text
/// - `key >= 8`, `key > 8`, `key <= 8`, `key < 8`: numeric comparison
/// - `key`: boolean flag is true
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Contains { key: String, substr: String },
    Compare { key: String, op: CmpOp, threshold: f64 },
    Flag { key: String },
}

impl Condition {
    /// Evaluate against the store. Missing keys never satisfy a condition.
    pub fn evaluate(&self, store: &StateStore) -> bool {
        match self {
            Self::Equals { key, value } => store.get(key).is_some_and(|v| v.render() == *value),
            Self::NotEquals { key, value } => {
                store.get(key).is_some_and(|v| v.render() != *value)
            }
            Self::Contains { key, substr } => store
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.contains(substr.as_str())),
            Self::Compare { key, op, threshold } => store
                .get(key)
                .and_then(|v| v.as_f64())
                .is_some_and(|n| match op {
                    CmpOp::Ge => n >= *threshold,
                    CmpOp::Gt => n > *threshold,
                    CmpOp::Le => n <= *threshold,
                    CmpOp::Lt => n < *threshold,
                }),
            Self::Flag { key } => store.get(key).and_then(|v| v.as_bool()) == Some(true),
        }
    }
}

impl FromStr for Condition {
    type Err = WeftError;

    /// The key is read first and the operator must follow it directly, so
    /// operator characters inside a quoted value are never mistaken for one.
    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let malformed = || WeftError::LoopConfig(format!("malformed condition '{}'", expr));

        let key_len = expr.find(|c: char| !is_key_char(c)).unwrap_or(expr.len());
        let (key, rest) = expr.split_at(key_len);
        if key.is_empty() {
            return Err(malformed());
        }
        let key = key.to_string();
        let rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(Self::Flag { key });
        }

        if let Some(value) = rest.strip_prefix("contains") {
            if !value.starts_with(char::is_whitespace) {
                return Err(malformed());
            }
            return Ok(Self::Contains {
                key,
                substr: operand(value).map(unquote).ok_or_else(malformed)?,
            });
        }
        if let Some(value) = rest.strip_prefix("!=") {
            return Ok(Self::NotEquals {
                key,
                value: operand(value).map(unquote).ok_or_else(malformed)?,
            });
        }
        if let Some(value) = rest.strip_prefix("==") {
            return Ok(Self::Equals {
                key,
                value: operand(value).map(unquote).ok_or_else(malformed)?,
            });
        }
        for (token, op) in [
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ] {
            if let Some(raw) = rest.strip_prefix(token) {
                let raw = operand(raw).ok_or_else(malformed)?;
                let threshold = raw.parse::<f64>().map_err(|_| {
                    WeftError::LoopConfig(format!(
                        "condition '{}': '{}' is not a number",
                        expr, raw
                    ))
                })?;
                return Ok(Self::Compare { key, op, threshold });
            }
        }

        Err(WeftError::LoopConfig(format!(
            "unparseable condition '{}'",
            expr
        )))
    }
}

/// Right-hand side of an operator; `None` when empty.
fn operand(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    (!raw.is_empty()).then_some(raw)
}

/// Strip one pair of surrounding double quotes.
fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-')
}
