//! Evaluation ordering
//!
//! Depth-first topological sort over the dependency graph, visiting roots
//! in declaration order and dependencies in name order so the result is
//! deterministic. When the walk reaches a variable that is still being
//! visited, the edge that closed the cycle is dropped and recorded.

use crate::graph::DependencyGraph;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A dependency edge removed to break a cycle: `from` reads `to`, but `to`
/// may not be resolved yet when `from` is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokenEdge {
    pub from: String,
    pub to: String,
}

impl fmt::Display for BrokenEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub order: Vec<String>,
    pub broken_edges: Vec<BrokenEdge>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Orders the variables of `graph`. With `only_names`, the working set is
/// those names plus their transitive dependencies.
pub fn schedule(graph: &DependencyGraph, only_names: Option<&BTreeSet<String>>) -> Schedule {
    let working: BTreeSet<String> = match only_names {
        Some(names) => graph.forward_closure(names),
        None => graph.nodes().iter().cloned().collect(),
    };

    let mut marks: HashMap<String, Mark> = HashMap::with_capacity(working.len());
    let mut result = Schedule::default();

    for name in graph.nodes() {
        if working.contains(name) && !marks.contains_key(name) {
            visit(name, graph, &working, &mut marks, &mut result);
        }
    }

    if !result.broken_edges.is_empty() {
        log::warn!(
            "Broke {} dependency cycle edge(s): {}",
            result.broken_edges.len(),
            result
                .broken_edges
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    result
}

fn visit(
    name: &str,
    graph: &DependencyGraph,
    working: &BTreeSet<String>,
    marks: &mut HashMap<String, Mark>,
    result: &mut Schedule,
) {
    marks.insert(name.to_string(), Mark::Visiting);

    for dependency in graph.dependencies(name) {
        if !working.contains(dependency) {
            continue;
        }
        match marks.get(dependency).copied() {
            Some(Mark::Done) => {}
            Some(Mark::Visiting) => {
                log::debug!("Cycle detected at '{}' -> '{}'", name, dependency);
                result.broken_edges.push(BrokenEdge {
                    from: name.to_string(),
                    to: dependency.clone(),
                });
            }
            None => visit(dependency, graph, working, marks, result),
        }
    }

    marks.insert(name.to_string(), Mark::Done);
    result.order.push(name.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{VariableDefinition, VariableSet};

    fn graph(defs: Vec<VariableDefinition>) -> DependencyGraph {
        let set: VariableSet = defs.into_iter().collect();
        DependencyGraph::build(&set, &BTreeSet::new())
    }

    fn position(schedule: &Schedule, name: &str) -> usize {
        schedule.order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let g = graph(vec![
            VariableDefinition::expression("total", "base + bonus"),
            VariableDefinition::expression("bonus", "base * 2"),
            VariableDefinition::literal("base", 3.0),
        ]);
        let s = schedule(&g, None);
        assert_eq!(s.order, vec!["base", "bonus", "total"]);
        assert!(s.broken_edges.is_empty());
    }

    #[test]
    fn test_order_is_deterministic() {
        let defs = vec![
            VariableDefinition::expression("a", "c + d"),
            VariableDefinition::expression("b", "d"),
            VariableDefinition::literal("c", 1.0),
            VariableDefinition::literal("d", 2.0),
        ];
        let first = schedule(&graph(defs.clone()), None);
        for _ in 0..10 {
            assert_eq!(schedule(&graph(defs.clone()), None), first);
        }
        assert!(position(&first, "c") < position(&first, "a"));
        assert!(position(&first, "d") < position(&first, "b"));
    }

    #[test]
    fn test_cycle_edge_is_dropped() {
        let g = graph(vec![
            VariableDefinition::expression("x", "y + 1"),
            VariableDefinition::expression("y", "x + 1"),
        ]);
        let s = schedule(&g, None);
        assert_eq!(s.order, vec!["y", "x"]);
        assert_eq!(
            s.broken_edges,
            vec![BrokenEdge {
                from: "y".to_string(),
                to: "x".to_string()
            }]
        );
    }

    #[test]
    fn test_restricted_working_set() {
        let g = graph(vec![
            VariableDefinition::literal("a", 1.0),
            VariableDefinition::expression("b", "a + 1"),
            VariableDefinition::literal("unrelated", 0.0),
            VariableDefinition::expression("c", "b + 1"),
        ]);
        let only: BTreeSet<String> = ["c".to_string()].into_iter().collect();
        let s = schedule(&g, Some(&only));
        assert_eq!(s.order, vec!["a", "b", "c"]);

        let empty = BTreeSet::new();
        assert!(schedule(&g, Some(&empty)).order.is_empty());
    }
}
