//! `{name}` and `{name[index]}` placeholder substitution
//!
//! Placeholders are expanded innermost-first, so `{rolls[{pick}]}` first
//! becomes `{rolls[2]}` and then the third roll. Braces whose content is
//! not a placeholder are kept verbatim.

use crate::error::{EngineError, Result};
use crate::utils::{in_spans, string_literal_spans};
use crate::value::Value;
use regex::Regex;

/// How a substituted value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderMode {
    /// Labels and titles: strings raw, arrays in canonical text form.
    Display,
    /// Executable text: values become literal source (`"text"`, `[1,2]`),
    /// and braces inside string literals are left alone.
    SourceLiteral,
}

pub struct PlaceholderExpander {
    placeholder_regex: Regex,
}

impl PlaceholderExpander {
    pub fn new() -> Self {
        Self {
            placeholder_regex: Regex::new(
                r"^\s*(?:this\s*\.\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:\[\s*([^\]]*?)\s*\])?\s*$",
            )
            .unwrap(),
        }
    }

    /// True if `text` might contain a placeholder worth expanding.
    pub fn has_placeholders(text: &str) -> bool {
        text.contains('{')
    }

    /// Expands every placeholder in `text`.
    ///
    /// `lookup` returns the current value of a declared name (null when not
    /// yet resolved) and `None` for undeclared names, which fail with
    /// `UnknownVariable`.
    pub fn expand(
        &self,
        text: &str,
        lookup: &dyn Fn(&str) -> Option<Value>,
        mode: PlaceholderMode,
    ) -> Result<String> {
        let strings = match mode {
            PlaceholderMode::SourceLiteral => string_literal_spans(text, true),
            PlaceholderMode::Display => Vec::new(),
        };

        let mut output = String::with_capacity(text.len());
        let mut i = 0;
        while i < text.len() {
            let Some(ch) = text[i..].chars().next() else {
                break;
            };
            if ch == '{' && !in_spans(&strings, i) {
                if let Some(close) = find_matching_brace(text, i) {
                    let inner = self.expand(&text[i + 1..close], lookup, mode)?;
                    match self.resolve(&inner, lookup)? {
                        Some(value) => output.push_str(&render(&value, mode)),
                        None => {
                            output.push('{');
                            output.push_str(&inner);
                            output.push('}');
                        }
                    }
                    i = close + 1;
                    continue;
                }
            }
            output.push(ch);
            i += ch.len_utf8();
        }
        Ok(output)
    }

    /// Resolves the content of one placeholder. `Ok(None)` means the braces
    /// did not hold placeholder syntax.
    fn resolve(&self, inner: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Option<Value>> {
        let Some(captures) = self.placeholder_regex.captures(inner) else {
            return Ok(None);
        };
        let name = &captures[1];
        let value = lookup(name).ok_or_else(|| {
            log::warn!("Placeholder references undeclared variable '{}'", name);
            EngineError::unknown_variable(name)
        })?;

        let Some(index) = captures.get(2) else {
            return Ok(Some(value));
        };
        let position = index
            .as_str()
            .trim_matches(|c| c == '"' || c == '\'')
            .parse::<f64>()
            .ok()
            .filter(|p| *p >= 0.0 && p.fract() == 0.0)
            .map(|p| p as usize);

        let element = match (&value, position) {
            (Value::Array(items), Some(p)) => items.get(p).cloned().unwrap_or(Value::Null),
            (Value::String(s), Some(p)) => s
                .chars()
                .nth(p)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Ok(Some(element))
    }
}

impl Default for PlaceholderExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn render(value: &Value, mode: PlaceholderMode) -> String {
    match mode {
        PlaceholderMode::Display => value.to_display_string(),
        PlaceholderMode::SourceLiteral => value.to_source_text(),
    }
}

fn find_matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in text[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scope() -> BTreeMap<String, Value> {
        let mut scope = BTreeMap::new();
        scope.insert("hp".to_string(), Value::Number(10.0));
        scope.insert("name".to_string(), Value::from("Ayla"));
        scope.insert("pick".to_string(), Value::Number(1.0));
        scope.insert(
            "rolls".to_string(),
            Value::Array(vec![Value::Number(4.0), Value::Number(6.0)]),
        );
        scope
    }

    fn expand(text: &str, mode: PlaceholderMode) -> Result<String> {
        let scope = scope();
        let lookup = |name: &str| scope.get(name).cloned();
        PlaceholderExpander::new().expand(text, &lookup, mode)
    }

    #[test]
    fn test_display_substitution() {
        assert_eq!(
            expand("{name}: {hp} HP", PlaceholderMode::Display).unwrap(),
            "Ayla: 10 HP"
        );
        assert_eq!(
            expand("rolls {rolls}", PlaceholderMode::Display).unwrap(),
            "rolls [4,6]"
        );
    }

    #[test]
    fn test_nested_placeholders() {
        assert_eq!(
            expand("best: {rolls[{pick}]}", PlaceholderMode::Display).unwrap(),
            "best: 6"
        );
        assert_eq!(expand("{rolls[9]}", PlaceholderMode::Display).unwrap(), "null");
    }

    #[test]
    fn test_source_literal_mode() {
        assert_eq!(
            expand("{name} + ' {hp}'", PlaceholderMode::SourceLiteral).unwrap(),
            "\"Ayla\" + ' {hp}'"
        );
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        match expand("{missing}", PlaceholderMode::Display) {
            Err(EngineError::UnknownVariable { name }) => assert_eq!(name, "missing"),
            other => panic!("Expected UnknownVariable, got {:?}", other),
        }
    }

    #[test]
    fn test_non_placeholder_braces_are_kept() {
        assert_eq!(
            expand("{ not a placeholder } {", PlaceholderMode::Display).unwrap(),
            "{ not a placeholder } {"
        );
    }
}
