//! Resolution passes
//!
//! A pass evaluates variables in scheduled order against a scope seeded by
//! the caller. Literals are copied, expressions are evaluated, and a
//! failure resolves the variable to null with a diagnostic instead of
//! aborting the pass.

use crate::evaluator::{EvalContext, Evaluator, Runtime};
use crate::graph::DependencyGraph;
use crate::scheduler::{schedule, BrokenEdge};
use crate::sequencer::SequencingMode;
use crate::store::{DefinitionKind, ResolvedScope, VariableSet};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

/// A variable that failed to evaluate and was resolved to null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variable, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// The full scope: seed values plus everything evaluated in the pass.
    pub scope: ResolvedScope,
    /// Variables evaluated, in evaluation order.
    pub order: Vec<String>,
    pub broken_edges: Vec<BrokenEdge>,
    pub diagnostics: Vec<Diagnostic>,
}

pub type ResolvedCallback<'c> = &'c mut dyn FnMut(&str, &Value);

pub struct Resolver<'a> {
    runtime: &'a Runtime,
}

impl<'a> Resolver<'a> {
    pub fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    pub async fn resolve_variables(
        &self,
        definitions: &VariableSet,
        seed: ResolvedScope,
        on_resolved: Option<ResolvedCallback<'_>>,
        only_names: Option<&BTreeSet<String>>,
    ) -> Resolution {
        let graph = DependencyGraph::build(definitions, &self.runtime.integrations.namespaces());
        self.resolve_with_graph(definitions, &graph, seed, on_resolved, only_names)
            .await
    }

    /// Same as `resolve_variables` with a graph the caller already built.
    /// Names outside the working set keep their seed values.
    pub async fn resolve_with_graph(
        &self,
        definitions: &VariableSet,
        graph: &DependencyGraph,
        seed: ResolvedScope,
        mut on_resolved: Option<ResolvedCallback<'_>>,
        only_names: Option<&BTreeSet<String>>,
    ) -> Resolution {
        let plan = schedule(graph, only_names);
        let declared = definitions.name_set();
        let scope = RefCell::new(seed);
        let mut diagnostics = Vec::new();

        // Across a broken cycle edge a variable reads its seed value (null
        // when it has none)
        for name in &plan.order {
            let Some(definition) = definitions.get(name) else {
                continue;
            };

            let value = match &definition.kind {
                DefinitionKind::Literal(value) => value.clone(),
                DefinitionKind::Expression(text) => {
                    let evaluator = Evaluator::new(EvalContext {
                        runtime: self.runtime,
                        scope: &scope,
                        declared: &declared,
                        primitives: None,
                    });
                    match evaluator.evaluate(text, SequencingMode::Expression).await {
                        Ok(value) => value,
                        Err(e) => {
                            log::warn!("Failed to evaluate '{}': {}", name, e);
                            diagnostics.push(Diagnostic {
                                variable: name.clone(),
                                message: e.to_string(),
                            });
                            Value::Null
                        }
                    }
                }
            };

            log::trace!("Resolved {} = {}", name, value);
            if let Some(callback) = on_resolved.as_mut() {
                callback(name, &value);
            }
            scope.borrow_mut().insert(name.clone(), value);
        }

        Resolution {
            scope: scope.into_inner(),
            order: plan.order,
            broken_edges: plan.broken_edges,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VariableDefinition;

    fn set(defs: Vec<VariableDefinition>) -> VariableSet {
        defs.into_iter().collect()
    }

    #[tokio::test]
    async fn test_full_pass() {
        let runtime = Runtime::new();
        let defs = set(vec![
            VariableDefinition::expression("total", "base * 2 + {bonus}"),
            VariableDefinition::literal("base", 3.0),
            VariableDefinition::literal("bonus", 1.0),
        ]);
        let mut seen = Vec::new();
        let mut record = |name: &str, value: &Value| seen.push((name.to_string(), value.clone()));
        let resolution = Resolver::new(&runtime)
            .resolve_variables(&defs, ResolvedScope::new(), Some(&mut record), None)
            .await;

        assert_eq!(resolution.scope["total"], Value::Number(7.0));
        assert_eq!(resolution.order.last().map(String::as_str), Some("total"));
        assert_eq!(seen.len(), 3);
        assert!(resolution.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_literals_are_copied_unchanged() {
        let runtime = Runtime::new();
        let defs = set(vec![
            VariableDefinition::literal("s", "1 + 1"),
            VariableDefinition::literal("list", vec![Value::Number(1.0), Value::from("x")]),
        ]);
        let resolution = Resolver::new(&runtime)
            .resolve_variables(&defs, ResolvedScope::new(), None, None)
            .await;
        assert_eq!(resolution.scope["s"], Value::from("1 + 1"));
        assert_eq!(resolution.scope["list"], Value::Array(vec![Value::Number(1.0), Value::from("x")]));
    }

    #[tokio::test]
    async fn test_failures_resolve_to_null() {
        let runtime = Runtime::new();
        let defs = set(vec![
            VariableDefinition::expression("bad", "undeclared_name * 2"),
            VariableDefinition::expression("next", "1 +"),
            VariableDefinition::literal("ok", 1.0),
        ]);
        let resolution = Resolver::new(&runtime)
            .resolve_variables(&defs, ResolvedScope::new(), None, None)
            .await;
        assert_eq!(resolution.scope["bad"], Value::Null);
        assert_eq!(resolution.scope["next"], Value::Null);
        assert_eq!(resolution.scope["ok"], Value::Number(1.0));
        assert_eq!(resolution.diagnostics.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_resolves_without_hanging() {
        let runtime = Runtime::new();
        let defs = set(vec![
            VariableDefinition::expression("x", "y + 1"),
            VariableDefinition::expression("y", "x + 1"),
        ]);
        let resolution = Resolver::new(&runtime)
            .resolve_variables(&defs, ResolvedScope::new(), None, None)
            .await;
        assert_eq!(resolution.broken_edges.len(), 1);
        assert_eq!(resolution.scope["y"], Value::Number(1.0));
        assert_eq!(resolution.scope["x"], Value::Number(2.0));

        // The broken edge reads the value from the previous pass
        let mut seed = ResolvedScope::new();
        seed.insert("x".to_string(), Value::Number(10.0));
        let again = Resolver::new(&runtime).resolve_variables(&defs, seed, None, None).await;
        assert_eq!(again.scope["y"], Value::Number(11.0));
        assert_eq!(again.scope["x"], Value::Number(12.0));
    }

    #[tokio::test]
    async fn test_restricted_pass_keeps_seed_values() {
        let runtime = Runtime::new();
        let defs = set(vec![
            VariableDefinition::literal("a", 5.0),
            VariableDefinition::expression("b", "a + 1"),
            VariableDefinition::expression("c", "100"),
        ]);
        let mut seed = ResolvedScope::new();
        seed.insert("a".to_string(), Value::Number(5.0));
        seed.insert("b".to_string(), Value::Number(0.0));
        seed.insert("c".to_string(), Value::Number(-1.0));

        let only: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let resolution = Resolver::new(&runtime)
            .resolve_variables(&defs, seed, None, Some(&only))
            .await;
        assert_eq!(resolution.order, vec!["a", "b"]);
        assert_eq!(resolution.scope["b"], Value::Number(6.0));
        assert_eq!(resolution.scope["c"], Value::Number(-1.0));
    }
}
