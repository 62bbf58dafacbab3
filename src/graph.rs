//! Dependency graph between the variables of one scope
//!
//! References are found by scanning expression text for identifiers, not
//! by parsing it, so expressions that do not parse still contribute edges.
//! A reference is a bare identifier naming a declared variable, or
//! `this.name` / `this["name"]`. Member names after any other dot, and
//! anything inside quoted strings, are ignored. Template interpolations are
//! scanned like plain text.

use crate::store::VariableSet;
use crate::utils::{ends_with_keyword, in_spans, is_member_access, non_code_spans};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Names referenced by one expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub variables: BTreeSet<String>,
    pub namespaces: BTreeSet<String>,
}

pub struct ReferenceScanner {
    identifier_regex: Regex,
    this_index_regex: Regex,
}

impl ReferenceScanner {
    pub fn new() -> Self {
        Self {
            identifier_regex: Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap(),
            this_index_regex: Regex::new(r#"\bthis\s*\[\s*["']([A-Za-z_][A-Za-z0-9_]*)["']\s*\]"#).unwrap(),
        }
    }

    /// Scans `text` for references to `declared` variables and to
    /// `namespaces` (an identifier followed by a dot).
    pub fn scan(&self, text: &str, declared: &HashSet<String>, namespaces: &BTreeSet<String>) -> References {
        let strings = non_code_spans(text);
        let mut references = References::default();

        for m in self.identifier_regex.find_iter(text) {
            let start = m.start();
            if in_spans(&strings, start) {
                continue;
            }
            let name = m.as_str();

            if is_member_access(text, start) {
                // Only `this.name` counts among dotted names
                let before_dot = text[..start].trim_end();
                let before_dot = &before_dot[..before_dot.len() - 1];
                if ends_with_keyword(before_dot, "this") && declared.contains(name) {
                    references.variables.insert(name.to_string());
                }
                continue;
            }

            if declared.contains(name) {
                references.variables.insert(name.to_string());
            } else if namespaces.contains(name) && text[m.end()..].trim_start().starts_with('.') {
                references.namespaces.insert(name.to_string());
            }
        }

        for captures in self.this_index_regex.captures_iter(text) {
            let name = &captures[1];
            if declared.contains(name) && !in_spans(&strings, captures.get(0).map_or(0, |m| m.start())) {
                references.variables.insert(name.to_string());
            }
        }

        references
    }
}

impl Default for ReferenceScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Directed graph: an edge `a -> b` means `a`'s expression references `b`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
    namespace_refs: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn build(definitions: &VariableSet, namespaces: &BTreeSet<String>) -> Self {
        let scanner = ReferenceScanner::new();
        let declared = definitions.name_set();
        let mut graph = DependencyGraph::default();

        for definition in definitions.iter() {
            let name = definition.name.clone();
            graph.nodes.push(name.clone());
            graph.forward.entry(name.clone()).or_default();
            graph.reverse.entry(name.clone()).or_default();

            let Some(text) = definition.expression_text() else {
                continue;
            };
            let references = scanner.scan(text, &declared, namespaces);
            for dependency in references.variables {
                if dependency == name {
                    continue;
                }
                graph.forward.entry(name.clone()).or_default().insert(dependency.clone());
                graph.reverse.entry(dependency).or_default().insert(name.clone());
            }
            if !references.namespaces.is_empty() {
                graph.namespace_refs.insert(name, references.namespaces);
            }
        }

        log::debug!(
            "Built dependency graph: {} variables, {} edges",
            graph.nodes.len(),
            graph.edge_count()
        );
        graph
    }

    /// Variable names in declaration order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.forward.contains_key(name)
    }

    /// Variables `name` reads.
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &String> {
        self.forward.get(name).into_iter().flatten()
    }

    /// Variables that read `name`.
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(name).into_iter().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    /// Integration namespaces referenced by `name`'s expression.
    pub fn namespaces_of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.namespace_refs.get(name).into_iter().flatten()
    }

    /// Variables whose expression references any of `namespaces`.
    pub fn referencing_namespaces(&self, namespaces: &BTreeSet<String>) -> BTreeSet<String> {
        self.namespace_refs
            .iter()
            .filter(|(_, used)| !used.is_disjoint(namespaces))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// `names` plus everything they transitively depend on.
    pub fn forward_closure(&self, names: &BTreeSet<String>) -> BTreeSet<String> {
        closure(&self.forward, names)
    }

    /// `names` plus everything that transitively depends on them.
    pub fn reverse_closure(&self, names: &BTreeSet<String>) -> BTreeSet<String> {
        closure(&self.reverse, names)
    }
}

fn closure(edges: &BTreeMap<String, BTreeSet<String>>, seeds: &BTreeSet<String>) -> BTreeSet<String> {
    let mut seen: BTreeSet<String> = seeds.iter().filter(|n| edges.contains_key(*n)).cloned().collect();
    let mut pending: Vec<String> = seen.iter().cloned().collect();

    while let Some(name) = pending.pop() {
        for next in edges.get(&name).into_iter().flatten() {
            if seen.insert(next.clone()) {
                pending.push(next.clone());
            }
        }
    }
    seen
}
