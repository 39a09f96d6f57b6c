use std::collections::HashMap;

use veristream_core::Value;

use crate::error::ScenarioError;

/// Named scalar bindings substituted into action fields.
///
/// The engine refreshes the `position` and `duration` pseudo-variables
/// (seconds, +∞ when the pipeline cannot answer) before every
/// substitution pass; everything else comes from `set-vars` actions and
/// scenario constants.
#[derive(Debug, Default)]
pub struct VariableStore {
    map: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.map.insert(name.into(), value);
    }

    pub fn set_double(&mut self, name: impl Into<String>, value: f64) {
        self.map.insert(name.into(), Value::Double(value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Numeric view used by the expression evaluator.
    pub fn lookup_double(&self, name: &str) -> Option<f64> {
        self.map.get(name).and_then(Value::as_double)
    }

    /// Replace every `$(name)` occurrence in `input`.
    ///
    /// Numeric bindings substitute their numeric literal. An undefined
    /// name is fatal to the caller.
    pub fn substitute(&self, input: &str) -> Result<String, ScenarioError> {
        if !input.contains("$(") {
            return Ok(input.to_string());
        }
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find(')') else {
                // No closing paren: keep the tail literally.
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = &after[..end];
            let Some(value) = self.map.get(name) else {
                return Err(ScenarioError::UndefinedVariable {
                    name: name.to_string(),
                });
            };
            match value {
                Value::Str(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_replaces_every_occurrence() {
        let mut vars = VariableStore::new();
        vars.set("name", Value::Str("sink0".into()));
        let out = vars.substitute("$(name) and $(name)").unwrap();
        assert_eq!(out, "sink0 and sink0");
    }

    #[test]
    fn numeric_bindings_substitute_literals() {
        let mut vars = VariableStore::new();
        vars.set_double("base", 2.0);
        vars.set("count", Value::Int(3));
        assert_eq!(vars.substitute("$(base)*$(count)").unwrap(), "2.0*3");
    }

    #[test]
    fn undefined_variable_is_fatal() {
        let vars = VariableStore::new();
        let err = vars.substitute("$(nope)").unwrap_err();
        assert!(matches!(err, ScenarioError::UndefinedVariable { .. }));
    }

    #[test]
    fn substitution_is_idempotent_without_tokens() {
        let vars = VariableStore::new();
        let input = "no tokens here $ ( not one )";
        assert_eq!(vars.substitute(input).unwrap(), input);
    }
}
