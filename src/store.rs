//! Variable definition store
//!
//! Definitions are kept per scope (one global scope plus one per page) in
//! declaration order. A definition is either a literal or an expression;
//! mutating a variable through a command primitive freezes it into a
//! literal holding the written value.

use crate::error::{EngineError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Map of variable name to its currently computed value.
pub type ResolvedScope = BTreeMap<String, Value>;

/// Identifies a variable scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScopeId {
    Global,
    Page(String),
}

impl ScopeId {
    pub fn page(name: impl Into<String>) -> Self {
        ScopeId::Page(name.into())
    }

    pub fn page_name(&self) -> Option<&str> {
        match self {
            ScopeId::Global => None,
            ScopeId::Page(name) => Some(name),
        }
    }

    /// Stable key used by persistence backends.
    pub fn storage_key(&self) -> String {
        match self {
            ScopeId::Global => "global".to_string(),
            ScopeId::Page(name) => format!("page:{}", name),
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Global => write!(f, "global"),
            ScopeId::Page(name) => write!(f, "page '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    Literal(Value),
    Expression(String),
}

/// A declared variable: its rule plus optional numeric bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl VariableDefinition {
    pub fn literal(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Literal(value.into()),
            min: None,
            max: None,
        }
    }

    pub fn expression(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionKind::Expression(text.into()),
            min: None,
            max: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, DefinitionKind::Literal(_))
    }

    pub fn expression_text(&self) -> Option<&str> {
        match &self.kind {
            DefinitionKind::Expression(text) => Some(text),
            DefinitionKind::Literal(_) => None,
        }
    }

    /// Clamps numeric values into `[min, max]`. Non-numeric values and
    /// unbounded definitions pass through untouched.
    pub fn clamp(&self, value: Value) -> Value {
        match value {
            Value::Number(mut n) if !n.is_nan() => {
                if let Some(max) = self.max {
                    n = n.min(max);
                }
                if let Some(min) = self.min {
                    n = n.max(min);
                }
                Value::Number(n)
            }
            other => other,
        }
    }

    /// Converts the definition into a literal, discarding any expression.
    pub fn freeze(&mut self, value: Value) {
        self.kind = DefinitionKind::Literal(value);
    }

    fn validate(&self) -> Result<()> {
        if !crate::is_valid_identifier(&self.name) {
            return Err(EngineError::definition(&self.name, "not a valid identifier"));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(EngineError::definition(
                    &self.name,
                    format!("min {} is greater than max {}", min, max),
                ));
            }
        }
        Ok(())
    }
}

/// Ordered collection of definitions with unique names.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    definitions: Vec<VariableDefinition>,
    index: HashMap<String, usize>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition, replacing an existing one of the same name in
    /// place so declaration order is preserved.
    pub fn insert(&mut self, definition: VariableDefinition) -> Result<()> {
        definition.validate()?;
        if let Some(&position) = self.index.get(&definition.name) {
            log::warn!("Variable '{}' redefined", definition.name);
            self.definitions[position] = definition;
        } else {
            self.index.insert(definition.name.clone(), self.definitions.len());
            self.definitions.push(definition);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VariableDefinition> {
        self.index.get(name).map(|&i| &self.definitions[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VariableDefinition> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.definitions[i]),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.definitions.iter()
    }

    /// Names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn name_set(&self) -> HashSet<String> {
        self.index.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl FromIterator<VariableDefinition> for VariableSet {
    /// Collects definitions, skipping any that fail validation.
    fn from_iter<I: IntoIterator<Item = VariableDefinition>>(iter: I) -> Self {
        let mut set = VariableSet::new();
        for definition in iter {
            if let Err(e) = set.insert(definition) {
                log::warn!("Skipping definition: {}", e);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        let hp = VariableDefinition::literal("hp", 10.0).with_bounds(Some(0.0), Some(50.0));
        assert_eq!(hp.clamp(Value::Number(999.0)), Value::Number(50.0));
        assert_eq!(hp.clamp(Value::Number(-3.0)), Value::Number(0.0));
        assert_eq!(hp.clamp(Value::from("x")), Value::from("x"));
    }

    #[test]
    fn test_freeze_discards_expression() {
        let mut def = VariableDefinition::expression("b", "this.a + 1");
        def.freeze(Value::Number(7.0));
        assert!(def.is_literal());
        assert_eq!(def.expression_text(), None);
    }

    #[test]
    fn test_redefinition_keeps_order() {
        let mut set = VariableSet::new();
        set.insert(VariableDefinition::literal("a", 1.0)).unwrap();
        set.insert(VariableDefinition::literal("b", 2.0)).unwrap();
        set.insert(VariableDefinition::expression("a", "5")).unwrap();
        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!set.get("a").unwrap().is_literal());
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let mut set = VariableSet::new();
        assert!(set.insert(VariableDefinition::literal("1abc", 1.0)).is_err());
        let inverted = VariableDefinition::literal("x", 1.0).with_bounds(Some(5.0), Some(1.0));
        assert!(set.insert(inverted).is_err());
    }

    #[test]
    fn test_scope_storage_key() {
        assert_eq!(ScopeId::Global.storage_key(), "global");
        assert_eq!(ScopeId::page("combat").storage_key(), "page:combat");
    }
}
