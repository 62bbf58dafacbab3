//! Automatic await sequencing
//!
//! Expression authors write `Sheet.get('k') + 1` without thinking about
//! deferred results. Before parsing, every call site of a deferred
//! operation is rewritten to `(await Sheet.get('k'))` so its value is
//! available before it takes part in arithmetic, comparison or
//! concatenation. Calls that are already awaited are left alone, and
//! arguments are rewritten recursively so nested deferred calls keep their
//! left-to-right order.
//!
//! Compiled call-site patterns and rewritten texts are cached per engine,
//! keyed by the integration-set version. Callers rewrite source text
//! before placeholder expansion, so the cache holds one entry per
//! expression or script rather than one per value it has seen.
//! Rewritten texts are capped at `MAX_CACHED_REWRITES`.

use crate::integration::IntegrationSet;
use crate::utils::{ends_with_keyword, find_matching_paren, in_spans, is_member_access, non_code_spans};
use regex::Regex;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// Command-only primitives that are always treated as deferred.
pub const MUTATION_PRIMITIVES: [&str; 2] = ["setValue", "addValue"];

pub const MAX_CACHED_REWRITES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencingMode {
    /// Variable expressions: deferred integration operations only.
    Expression,
    /// Command scripts: deferred operations plus the mutation primitives.
    Command,
}

#[derive(Debug, Default)]
struct SequencerCache {
    version: Option<u64>,
    call_sites: HashMap<SequencingMode, Option<Regex>>,
    namespaces: Option<Option<Regex>>,
    rewritten: HashMap<(SequencingMode, String), String>,
}

#[derive(Debug, Default)]
pub struct AwaitSequencer {
    cache: RefCell<SequencerCache>,
}

impl AwaitSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached pattern and rewrite.
    pub fn invalidate(&self) {
        let mut cache = self.cache.borrow_mut();
        log::debug!("Invalidating await sequencer cache (version {:?})", cache.version);
        *cache = SequencerCache::default();
    }

    /// Integration-set version the cache was built for, if any.
    pub fn cached_version(&self) -> Option<u64> {
        self.cache.borrow().version
    }

    pub fn cached_rewrites(&self) -> usize {
        self.cache.borrow().rewritten.len()
    }

    fn ensure_current(&self, integrations: &IntegrationSet) {
        let stale = self.cache.borrow().version != Some(integrations.version());
        if stale {
            self.invalidate();
            self.cache.borrow_mut().version = Some(integrations.version());
        }
    }

    /// Rewrites `text` so every deferred call site is awaited.
    pub fn rewrite(&self, integrations: &IntegrationSet, text: &str, mode: SequencingMode) -> String {
        self.ensure_current(integrations);

        let key = (mode, text.to_string());
        if let Some(hit) = self.cache.borrow().rewritten.get(&key) {
            return hit.clone();
        }

        let pattern = self.call_site_pattern(integrations, mode);
        let rewritten = match &pattern {
            Some(pattern) => rewrite_call_sites(pattern, text),
            None => text.to_string(),
        };
        if rewritten != text {
            log::trace!("Await sequencing: '{}' -> '{}'", text, rewritten);
        }

        let mut cache = self.cache.borrow_mut();
        if cache.rewritten.len() >= MAX_CACHED_REWRITES {
            log::debug!("Await sequencer cache full, dropping {} rewrite(s)", cache.rewritten.len());
            cache.rewritten.clear();
        }
        cache.rewritten.insert(key, rewritten.clone());
        rewritten
    }

    /// Integration namespaces textually invoked (`Ns.` prefix) in `text`.
    pub fn invoked_namespaces(&self, integrations: &IntegrationSet, text: &str) -> BTreeSet<String> {
        self.ensure_current(integrations);

        let pattern = {
            let mut cache = self.cache.borrow_mut();
            cache
                .namespaces
                .get_or_insert_with(|| build_namespace_pattern(integrations))
                .clone()
        };

        let mut found = BTreeSet::new();
        let Some(pattern) = pattern else {
            return found;
        };
        let strings = non_code_spans(text);
        for captures in pattern.captures_iter(text) {
            if let Some(ns) = captures.get(1) {
                if !in_spans(&strings, ns.start()) && !is_member_access(text, ns.start()) {
                    found.insert(ns.as_str().to_string());
                }
            }
        }
        found
    }

    fn call_site_pattern(&self, integrations: &IntegrationSet, mode: SequencingMode) -> Option<Regex> {
        let mut cache = self.cache.borrow_mut();
        cache
            .call_sites
            .entry(mode)
            .or_insert_with(|| {
                let mut sites = integrations.async_call_sites();
                if mode == SequencingMode::Command {
                    sites.extend(MUTATION_PRIMITIVES.iter().map(|p| p.to_string()));
                }
                build_call_site_pattern(&sites)
            })
            .clone()
    }
}

fn build_call_site_pattern(sites: &[String]) -> Option<Regex> {
    if sites.is_empty() {
        return None;
    }

    let mut alternatives: Vec<String> = sites
        .iter()
        .map(|site| {
            site.split('.')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s*\.\s*")
        })
        .collect();
    // Longest first so `Sheet.getRow` wins over `Sheet.get`
    alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    Regex::new(&format!(r"\b(?:{})\s*\(", alternatives.join("|")))
        .map_err(|e| log::error!("Failed to compile call-site pattern: {}", e))
        .ok()
}

fn build_namespace_pattern(integrations: &IntegrationSet) -> Option<Regex> {
    let namespaces: Vec<String> = integrations.namespaces().iter().map(|ns| regex::escape(ns)).collect();
    if namespaces.is_empty() {
        return None;
    }
    Regex::new(&format!(r"\b({})\s*\.", namespaces.join("|")))
        .map_err(|e| log::error!("Failed to compile namespace pattern: {}", e))
        .ok()
}

fn rewrite_call_sites(pattern: &Regex, text: &str) -> String {
    let strings = non_code_spans(text);
    let mut output = String::with_capacity(text.len() + 16);
    let mut copied_to = 0;
    let mut search_from = 0;

    while search_from <= text.len() {
        let Some(m) = pattern.find_at(text, search_from) else {
            break;
        };
        let start = m.start();
        if in_spans(&strings, start) || is_member_access(text, start) {
            search_from = m.end();
            continue;
        }

        let open = m.end() - 1;
        let Some(close) = find_matching_paren(text, open) else {
            // Unbalanced: leave the remainder for the parser to reject
            break;
        };

        output.push_str(&text[copied_to..start]);
        let arguments = rewrite_call_sites(pattern, &text[open + 1..close]);
        let call = format!("{}{})", &text[start..=open], arguments);

        if ends_with_keyword(&output, "await") {
            output.push_str(&call);
        } else {
            output.push_str("(await ");
            output.push_str(&call);
            output.push(')');
        }

        copied_to = close + 1;
        search_from = copied_to;
    }

    output.push_str(&text[copied_to..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Integration;
    use crate::value::Value;

    fn integrations() -> IntegrationSet {
        let mut set = IntegrationSet::new();
        set.register(
            Integration::new("Integration")
                .deferred("get", |_| async { Ok(Value::Number(41.0)) })
                .immediate("peek", |_| Ok(Value::Null)),
        );
        set
    }

    #[test]
    fn test_wraps_bare_async_call() {
        let sequencer = AwaitSequencer::new();
        let rewritten = sequencer.rewrite(&integrations(), "Integration.get('k') + 1", SequencingMode::Expression);
        assert_eq!(rewritten, "(await Integration.get('k')) + 1");
    }

    #[test]
    fn test_never_double_wraps() {
        let sequencer = AwaitSequencer::new();
        let text = "(await Integration.get('k')) + 1";
        assert_eq!(sequencer.rewrite(&integrations(), text, SequencingMode::Expression), text);
    }

    #[test]
    fn test_immediate_calls_and_strings_untouched() {
        let sequencer = AwaitSequencer::new();
        let text = "Integration.peek() + 'Integration.get(1)'";
        assert_eq!(sequencer.rewrite(&integrations(), text, SequencingMode::Expression), text);
    }

    #[test]
    fn test_nested_calls_keep_order() {
        let sequencer = AwaitSequencer::new();
        let rewritten = sequencer.rewrite(
            &integrations(),
            "Integration.get(Integration.get('a')) * 2",
            SequencingMode::Expression,
        );
        assert_eq!(rewritten, "(await Integration.get((await Integration.get('a')))) * 2");
    }

    #[test]
    fn test_command_mode_awaits_primitives() {
        let sequencer = AwaitSequencer::new();
        let set = integrations();
        let text = "setValue('a', 1); obj.setValue(2)";
        assert_eq!(
            sequencer.rewrite(&set, text, SequencingMode::Command),
            "(await setValue('a', 1)); obj.setValue(2)"
        );
        assert_eq!(sequencer.rewrite(&set, text, SequencingMode::Expression), text);
    }

    #[test]
    fn test_cache_follows_integration_version() {
        let sequencer = AwaitSequencer::new();
        let mut set = integrations();
        sequencer.rewrite(&set, "Integration.get(1)", SequencingMode::Expression);
        assert_eq!(sequencer.cached_version(), Some(set.version()));
        assert_eq!(sequencer.cached_rewrites(), 1);

        // Reconfigure: `get` becomes immediate
        set.register(Integration::new("Integration").immediate("get", |_| Ok(Value::Null)));
        let rewritten = sequencer.rewrite(&set, "Integration.get(1)", SequencingMode::Expression);
        assert_eq!(rewritten, "Integration.get(1)");
        assert_eq!(sequencer.cached_version(), Some(set.version()));
    }

    #[test]
    fn test_invoked_namespaces() {
        let sequencer = AwaitSequencer::new();
        let set = integrations();
        let found = sequencer.invoked_namespaces(&set, "addValue('hp', Integration.get('d')) + 'Other.x'");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["Integration".to_string()]);
        assert!(sequencer.invoked_namespaces(&set, "setValue('a', 1)").is_empty());
    }

    #[test]
    fn test_template_text_is_not_code() {
        let sequencer = AwaitSequencer::new();
        let text = "`call Integration.get(1) now ${Integration.get(2)}`";
        assert_eq!(
            sequencer.rewrite(&integrations(), text, SequencingMode::Expression),
            "`call Integration.get(1) now ${(await Integration.get(2))}`"
        );
        let found = sequencer.invoked_namespaces(&integrations(), "`Integration.get(1)`");
        assert!(found.is_empty());
    }

    #[test]
    fn test_rewrite_cache_is_bounded() {
        let sequencer = AwaitSequencer::new();
        let set = integrations();
        for i in 0..MAX_CACHED_REWRITES + 10 {
            sequencer.rewrite(&set, &format!("setValue('n', {})", i), SequencingMode::Command);
        }
        assert!(sequencer.cached_rewrites() <= MAX_CACHED_REWRITES);
    }
}
