use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{unescape, Value};

/// Errors raised while parsing structure text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StructureError {
    #[error("line {line}: empty structure name")]
    EmptyName { line: usize },
    #[error("line {line}: malformed field `{field}`")]
    MalformedField { line: usize, field: String },
    #[error("line {line}: unterminated {what}")]
    Unterminated { line: usize, what: &'static str },
    #[error("no structure found in input")]
    Empty,
}

/// An ordered, name-keyed record: `name, key1=value1, key2=value2;`.
///
/// Field order is preserved; lookups are linear, which is fine at the
/// sizes scenario files reach.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_double)
    }

    pub fn get_structure(&self, key: &str) -> Option<&Structure> {
        self.get(key).and_then(Value::as_structure)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.fields {
            write!(f, ", {k}={v}")?;
        }
        Ok(())
    }
}

impl FromStr for Structure {
    type Err = StructureError;

    /// Parse a single record; a trailing `;` is optional here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut all = parse_structures(s)?;
        if all.is_empty() {
            return Err(StructureError::Empty);
        }
        Ok(all.swap_remove(0))
    }
}

/// Parse a whole scenario file into its records.
///
/// Syntax: UTF-8 text; `#` starts a comment to end of line; a trailing
/// backslash continues a line; each record is terminated by `;`. Quoted
/// strings may contain any delimiter. `[...]` nests a structure value and
/// `{...}` a list value.
pub fn parse_structures(input: &str) -> Result<Vec<Structure>, StructureError> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut record_line = 1;
    let mut line = 1;
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                if !current.trim().is_empty() {
                    current.push(' ');
                } else {
                    record_line = line;
                }
            }
            '\\' if !in_quote => {
                // Trailing backslash joins lines; anywhere else it is kept.
                match chars.peek() {
                    Some('\n') => {
                        chars.next();
                        line += 1;
                    }
                    Some('\r') => {
                        chars.next();
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                        line += 1;
                    }
                    _ => current.push('\\'),
                }
            }
            '\\' if in_quote => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '#' if !in_quote => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        if !current.trim().is_empty() {
                            current.push(' ');
                        } else {
                            record_line = line;
                        }
                        break;
                    }
                }
            }
            '"' => {
                in_quote = !in_quote;
                current.push('"');
            }
            '[' | '{' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ';' if !in_quote && depth == 0 => {
                if !current.trim().is_empty() {
                    records.push(parse_record(current.trim(), record_line)?);
                }
                current.clear();
                record_line = line;
            }
            _ => current.push(c),
        }
    }

    if in_quote {
        return Err(StructureError::Unterminated {
            line,
            what: "quoted string",
        });
    }
    if depth > 0 {
        return Err(StructureError::Unterminated {
            line,
            what: "composite value",
        });
    }
    if !current.trim().is_empty() {
        records.push(parse_record(current.trim(), record_line)?);
    }
    Ok(records)
}

fn parse_record(record: &str, line: usize) -> Result<Structure, StructureError> {
    let parts = split_top_level(record, ',');
    let mut parts = parts.into_iter();
    let name = parts.next().unwrap_or_default().trim().to_string();
    if name.is_empty() || name.contains('=') {
        return Err(StructureError::EmptyName { line });
    }
    let mut structure = Structure::new(name);
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some(eq) = find_top_level(part, '=') else {
            return Err(StructureError::MalformedField {
                line,
                field: part.to_string(),
            });
        };
        let key = part[..eq].trim();
        let raw = part[eq + 1..].trim();
        if key.is_empty() || raw.is_empty() {
            return Err(StructureError::MalformedField {
                line,
                field: part.to_string(),
            });
        }
        structure.set(key, parse_value(raw, line)?);
    }
    Ok(structure)
}

fn parse_value(raw: &str, line: usize) -> Result<Value, StructureError> {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return Ok(Value::Structure(Box::new(parse_record(
            inner.trim(),
            line,
        )?)));
    }
    if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        let mut items = Vec::new();
        for item in split_top_level(inner, ',') {
            let item = item.trim();
            if !item.is_empty() {
                items.push(parse_value(item, line)?);
            }
        }
        return Ok(Value::List(items));
    }
    if let Some(rest) = raw.strip_prefix('"') {
        if let Some(inner) = rest.strip_suffix('"') {
            return Ok(Value::Str(unescape(inner)));
        }
    }
    Ok(Value::from_token(raw))
}

/// Split on `sep` outside quotes and composite delimiters.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '\\' if in_quote => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '[' | '{' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            _ if c == sep && !in_quote && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut skip_next = false;
    for (i, c) in s.char_indices() {
        if skip_next {
            skip_next = false;
            continue;
        }
        match c {
            '"' => in_quote = !in_quote,
            '\\' if in_quote => skip_next = true,
            '[' | '{' if !in_quote => depth += 1,
            ']' | '}' if !in_quote => depth = depth.saturating_sub(1),
            _ if c == needle && !in_quote && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_record() {
        let s: Structure = "seek, start=5.0, flags=accurate+flush;".parse().unwrap();
        assert_eq!(s.name(), "seek");
        assert_eq!(s.get_double("start"), Some(5.0));
        assert_eq!(s.get_str("flags"), Some("accurate+flush"));
    }

    #[test]
    fn parses_multiple_records_with_comments() {
        let text = "\
# warm-up
description, seek=true;
pause, playback-time=1.0; # mid-line comment
stop, playback-time=10.0;
";
        let all = parse_structures(text).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name(), "description");
        assert_eq!(all[1].get_double("playback-time"), Some(1.0));
    }

    #[test]
    fn backslash_continues_a_line() {
        let text = "seek, start=0.0, \\\n    stop=2.0;";
        let all = parse_structures(text).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_double("stop"), Some(2.0));
    }

    #[test]
    fn quoted_values_keep_delimiters() {
        let s: Structure =
            r#"wait, on-message="state-changed; sort of", name=w1;"#.parse().unwrap();
        assert_eq!(s.get_str("on-message"), Some("state-changed; sort of"));
        assert_eq!(s.get_str("name"), Some("w1"));
    }

    #[test]
    fn nested_structure_value() {
        let s: Structure =
            "pause, sub-action=[set-property, property-name=volume, property-value=0.5];"
                .parse()
                .unwrap();
        let sub = s.get_structure("sub-action").unwrap();
        assert_eq!(sub.name(), "set-property");
        assert_eq!(sub.get_double("property-value"), Some(0.5));
    }

    #[test]
    fn list_value() {
        let s: Structure = "select, ids={a, b, c};".parse().unwrap();
        let list = s.get("ids").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1], Value::Str("b".into()));
    }

    #[test]
    fn malformed_field_is_an_error() {
        let err = parse_structures("seek, start;").unwrap_err();
        assert!(matches!(err, StructureError::MalformedField { .. }));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse_structures("wait, name=\"oops;").unwrap_err();
        assert!(matches!(
            err,
            StructureError::Unterminated {
                what: "quoted string",
                ..
            }
        ));
    }

    #[test]
    fn display_round_trips() {
        let text = "seek, start=5.0, flags=accurate+flush, name=\"my seek\";";
        let s: Structure = text.parse().unwrap();
        let reparsed: Structure = s.to_string().parse().unwrap();
        assert_eq!(s, reparsed);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut s = Structure::new("seek");
        s.set("start", Value::Double(1.0));
        s.set("stop", Value::Double(2.0));
        s.set("start", Value::Double(3.0));
        let keys: Vec<_> = s.fields().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["start", "stop"]);
        assert_eq!(s.get_double("start"), Some(3.0));
    }
}
