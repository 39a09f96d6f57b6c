use std::fmt;

use serde::{Deserialize, Serialize};

use crate::structure::Structure;

/// A typed scalar or composite field value.
///
/// Unquoted identifiers in scenario files parse as [`Value::Str`]; numeric
/// literals parse as [`Value::Int`] when they have no fractional part or
/// exponent, [`Value::Double`] otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Structure(Box<Structure>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) => match s.as_str() {
                "true" | "TRUE" | "yes" | "1" => Some(true),
                "false" | "FALSE" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Numeric view; integers widen to double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Parse a raw field token the way the scenario file syntax does.
    ///
    /// The caller has already isolated the token (quotes and composite
    /// delimiters balanced); quoted strings arrive with their quotes.
    pub fn from_token(token: &str) -> Value {
        let token = token.trim();
        if let Some(rest) = token.strip_prefix('"') {
            if let Some(inner) = rest.strip_suffix('"') {
                return Value::Str(unescape(inner));
            }
        }
        match token {
            "true" | "TRUE" => return Value::Bool(true),
            "false" | "FALSE" => return Value::Bool(false),
            _ => {}
        }
        // An explicit `+` prefix stays textual: `+1` is a relative index,
        // not the number one.
        if !token.starts_with('+') {
            if let Ok(i) = token.parse::<i64>() {
                return Value::Int(i);
            }
            if let Ok(d) = token.parse::<f64>() {
                return Value::Double(d);
            }
        }
        Value::Str(token.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            Value::Str(s) => {
                if needs_quoting(s) {
                    write!(f, "\"{}\"", escape(s))
                } else {
                    write!(f, "{s}")
                }
            }
            Value::Structure(s) => write!(f, "[{s}]"),
            Value::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.parse::<f64>().is_ok()
        || !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '/' | ':'))
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parsing_picks_natural_types() {
        assert_eq!(Value::from_token("42"), Value::Int(42));
        assert_eq!(Value::from_token("-3"), Value::Int(-3));
        assert_eq!(Value::from_token("2.5"), Value::Double(2.5));
        assert_eq!(Value::from_token("true"), Value::Bool(true));
        assert_eq!(Value::from_token("playing"), Value::Str("playing".into()));
        assert_eq!(
            Value::from_token("\"with space\""),
            Value::Str("with space".into())
        );
    }

    #[test]
    fn quoted_escapes_round_trip() {
        let v = Value::Str("say \"hi\"".into());
        let printed = v.to_string();
        assert_eq!(printed, "\"say \\\"hi\\\"\"");
        assert_eq!(Value::from_token(&printed), v);
    }

    #[test]
    fn display_keeps_doubles_recognizable() {
        assert_eq!(Value::Double(5.0).to_string(), "5.0");
        assert_eq!(Value::Int(5).to_string(), "5");
    }

    #[test]
    fn numeric_accessors_coerce() {
        assert_eq!(Value::Int(3).as_double(), Some(3.0));
        assert_eq!(Value::Str("1.5".into()).as_double(), Some(1.5));
        assert_eq!(Value::Str("yes".into()).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_double(), None);
    }
}
