//! Change propagation after a command
//!
//! The affected set is every variable written by the command plus every
//! variable whose expression mentions an integration namespace the command
//! invoked (the integration may have changed state). Everything that
//! transitively depends on an affected variable is re-evaluated in a
//! restricted pass; all other values are left as they were.

use crate::evaluator::Runtime;
use crate::graph::{DependencyGraph, ReferenceScanner};
use crate::resolver::{Resolution, ResolvedCallback, Resolver};
use crate::store::{ResolvedScope, VariableSet};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationPlan {
    /// Directly affected variables.
    pub affected: BTreeSet<String>,
    /// Affected variables plus their transitive dependents.
    pub recompute: BTreeSet<String>,
}

impl PropagationPlan {
    pub fn is_empty(&self) -> bool {
        self.recompute.is_empty()
    }
}

pub fn plan(graph: &DependencyGraph, invoked_namespaces: &BTreeSet<String>, modified: &BTreeSet<String>) -> PropagationPlan {
    let mut affected = graph.referencing_namespaces(invoked_namespaces);
    affected.extend(modified.iter().filter(|name| graph.contains(name)).cloned());
    let recompute = graph.reverse_closure(&affected);
    PropagationPlan { affected, recompute }
}

/// Variables of `definitions` whose expressions read any of `names`, for
/// names that live in an enclosing scope and so are not graph nodes.
pub fn readers_of(definitions: &VariableSet, names: &HashSet<String>) -> BTreeSet<String> {
    let scanner = ReferenceScanner::new();
    let no_namespaces = BTreeSet::new();
    definitions
        .iter()
        .filter(|definition| !names.contains(&definition.name))
        .filter(|definition| {
            definition
                .expression_text()
                .map_or(false, |text| !scanner.scan(text, names, &no_namespaces).variables.is_empty())
        })
        .map(|definition| definition.name.clone())
        .collect()
}

/// Plans and runs propagation, seeding the pass with the post-command
/// scope. When nothing needs recomputing that scope comes back untouched.
pub async fn propagate(
    runtime: &Runtime,
    definitions: &VariableSet,
    post_command: ResolvedScope,
    invoked_namespaces: &BTreeSet<String>,
    modified: &BTreeSet<String>,
    on_resolved: Option<ResolvedCallback<'_>>,
) -> (PropagationPlan, Resolution) {
    let graph = DependencyGraph::build(definitions, &runtime.integrations.namespaces());
    let plan = plan(&graph, invoked_namespaces, modified);

    if plan.is_empty() {
        log::debug!("Nothing to propagate");
        let resolution = Resolution {
            scope: post_command,
            ..Resolution::default()
        };
        return (plan, resolution);
    }

    log::debug!(
        "Propagating {} affected variable(s) to {} total",
        plan.affected.len(),
        plan.recompute.len()
    );
    let resolution = Resolver::new(runtime)
        .resolve_with_graph(definitions, &graph, post_command, on_resolved, Some(&plan.recompute))
        .await;
    (plan, resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VariableDefinition;
    use crate::value::Value;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn definitions() -> VariableSet {
        vec![
            VariableDefinition::literal("a", 1.0),
            VariableDefinition::expression("b", "a + 1"),
            VariableDefinition::expression("c", "Sheet.get('x')"),
            VariableDefinition::expression("d", "c * 2"),
            VariableDefinition::literal("e", 0.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_plan_from_modified_and_namespaces() {
        let graph = DependencyGraph::build(&definitions(), &names(&["Sheet"]));

        let by_write = plan(&graph, &BTreeSet::new(), &names(&["a"]));
        assert_eq!(by_write.affected, names(&["a"]));
        assert_eq!(by_write.recompute, names(&["a", "b"]));

        let by_namespace = plan(&graph, &names(&["Sheet"]), &BTreeSet::new());
        assert_eq!(by_namespace.affected, names(&["c"]));
        assert_eq!(by_namespace.recompute, names(&["c", "d"]));

        assert!(plan(&graph, &names(&["Other"]), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_readers_of_enclosing_names() {
        let outer: HashSet<String> = ["level".to_string()].into_iter().collect();
        let page: VariableSet = vec![
            VariableDefinition::expression("bonus", "level * 2"),
            VariableDefinition::expression("other", "3"),
        ]
        .into_iter()
        .collect();
        assert_eq!(readers_of(&page, &outer), names(&["bonus"]));
    }

    #[tokio::test]
    async fn test_propagate_recomputes_dependents_only() {
        let runtime = Runtime::new();
        let mut defs = definitions();
        defs.get_mut("a").unwrap().freeze(Value::Number(10.0));

        let mut scope = ResolvedScope::new();
        scope.insert("a".to_string(), Value::Number(10.0));
        scope.insert("b".to_string(), Value::Number(2.0));
        scope.insert("c".to_string(), Value::Number(99.0));
        scope.insert("d".to_string(), Value::Number(198.0));
        scope.insert("e".to_string(), Value::Number(0.0));

        let (plan, resolution) = propagate(&runtime, &defs, scope, &BTreeSet::new(), &names(&["a"]), None).await;
        assert_eq!(plan.recompute, names(&["a", "b"]));
        assert_eq!(resolution.scope["b"], Value::Number(11.0));
        assert_eq!(resolution.scope["c"], Value::Number(99.0));
        assert_eq!(resolution.order, vec!["a", "b"]);
    }
}
