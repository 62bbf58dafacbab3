//! The engine: scopes, integrations, persistence and render hooks
//!
//! Control flow for a host:
//!
//! 1. `load_scope` resolves a scope in full (applying persisted overrides
//!    first) and reports every value to the `on_resolved` hook.
//! 2. `run_command` executes a script, then propagates the changes to the
//!    dependents of everything it modified and of every variable that reads
//!    an integration namespace the script invoked.
//!
//! Page passes are seeded from the global scope, so page expressions can
//! read global variables. A global command refreshes the page values that
//! read what it changed.

use crate::command::CommandExecutor;
use crate::document::SheetDocument;
use crate::error::{EngineError, Result};
use crate::evaluator::Runtime;
use crate::graph::DependencyGraph;
use crate::hooks::RenderHooks;
use crate::integration::{Integration, IntegrationSet};
use crate::persistence::{NullStore, PersistenceStore};
use crate::propagation::{self, readers_of};
use crate::resolver::{Diagnostic, Resolution, Resolver};
use crate::scheduler::{schedule, BrokenEdge, Schedule};
use crate::sequencer::SequencingMode;
use crate::store::{ResolvedScope, ScopeId, VariableDefinition, VariableSet};
use crate::template::PlaceholderMode;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;

/// Definitions and current values of one scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeState {
    pub definitions: VariableSet,
    pub resolved: ResolvedScope,
    pub commands: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub loaded: bool,
}

/// Result of `Engine::run_command`.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    /// Value of the script's last statement, if it completed.
    pub value: Option<Value>,
    /// Why the script stopped early. Mutations made before the failure are
    /// kept and propagated.
    pub error: Option<EngineError>,
    pub modified: BTreeSet<String>,
    /// Directly affected variables: modified ones plus readers of invoked
    /// integration namespaces.
    pub affected: BTreeSet<String>,
    /// Variables re-evaluated by propagation, in evaluation order.
    pub recomputed: Vec<String>,
    /// Page variables re-evaluated because a global command changed a
    /// global value they read.
    pub refreshed: Vec<(ScopeId, String)>,
    pub broken_edges: Vec<BrokenEdge>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Engine {
    runtime: Runtime,
    scopes: BTreeMap<ScopeId, ScopeState>,
    persistence: Rc<dyn PersistenceStore>,
    hooks: RefCell<RenderHooks>,
    document_integrations: BTreeSet<String>,
}

impl Engine {
    pub fn new() -> Self {
        let mut scopes = BTreeMap::new();
        scopes.insert(ScopeId::Global, ScopeState::default());
        Self {
            runtime: Runtime::new(),
            scopes,
            persistence: Rc::new(NullStore),
            hooks: RefCell::new(RenderHooks::new()),
            document_integrations: BTreeSet::new(),
        }
    }

    pub fn with_persistence(mut self, store: Rc<dyn PersistenceStore>) -> Self {
        self.persistence = store;
        self
    }

    pub fn from_document(document: &SheetDocument) -> Result<Self> {
        let mut engine = Self::new();
        engine.reload(document)?;
        Ok(engine)
    }

    /// Replaces every scope with the document's declarations and swaps in
    /// its table integrations. Resolved values are discarded; call
    /// `load_scope` or `load_all` afterwards.
    pub fn reload(&mut self, document: &SheetDocument) -> Result<()> {
        let mut scopes = BTreeMap::new();
        scopes.insert(
            ScopeId::Global,
            ScopeState {
                definitions: document.global_definitions()?,
                ..ScopeState::default()
            },
        );
        for (name, page) in &document.pages {
            scopes.insert(
                ScopeId::page(name.as_str()),
                ScopeState {
                    definitions: document.page_definitions(name)?,
                    commands: page.commands.clone(),
                    labels: page.labels.clone(),
                    ..ScopeState::default()
                },
            );
        }

        for name in std::mem::take(&mut self.document_integrations) {
            self.runtime.integrations.remove(&name);
        }
        for integration in document.build_integrations() {
            self.document_integrations.insert(integration.name.clone());
            self.runtime.integrations.register(integration);
        }
        self.runtime.sequencer.invalidate();
        self.scopes = scopes;

        log::info!(
            "Loaded sheet: {} global variable(s), {} page(s), {} integration(s)",
            document.variables.len(),
            document.pages.len(),
            self.document_integrations.len()
        );
        Ok(())
    }

    pub fn register_integration(&mut self, integration: Integration) {
        self.runtime.integrations.register(integration);
        self.runtime.sequencer.invalidate();
    }

    pub fn remove_integration(&mut self, name: &str) -> Option<Integration> {
        let removed = self.runtime.integrations.remove(name);
        if removed.is_some() {
            self.runtime.sequencer.invalidate();
        }
        removed
    }

    pub fn integrations(&self) -> &IntegrationSet {
        &self.runtime.integrations
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Adds or replaces a definition, creating the scope if needed.
    pub fn define(&mut self, scope: ScopeId, definition: VariableDefinition) -> Result<()> {
        self.scopes.entry(scope).or_default().definitions.insert(definition)
    }

    pub fn add_command(&mut self, scope: ScopeId, name: impl Into<String>, script: impl Into<String>) {
        self.scopes.entry(scope).or_default().commands.insert(name.into(), script.into());
    }

    pub fn add_label(&mut self, scope: ScopeId, name: impl Into<String>, text: impl Into<String>) {
        self.scopes.entry(scope).or_default().labels.insert(name.into(), text.into());
    }

    pub fn on_resolved(&mut self, callback: impl FnMut(&ScopeId, &str, &Value) + 'static) {
        self.hooks.get_mut().set_on_resolved(callback);
    }

    pub fn on_modified(&mut self, callback: impl FnMut(&ScopeId, &str, &Value) + 'static) {
        self.hooks.get_mut().set_on_modified(callback);
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = &ScopeId> {
        self.scopes.keys()
    }

    pub fn scope(&self, scope: &ScopeId) -> Option<&ScopeState> {
        self.scopes.get(scope)
    }

    fn state(&self, scope: &ScopeId) -> Result<&ScopeState> {
        self.scopes.get(scope).ok_or_else(|| EngineError::unknown_scope(scope))
    }

    pub fn resolved(&self, scope: &ScopeId) -> Option<&ResolvedScope> {
        self.scopes.get(scope).map(|state| &state.resolved)
    }

    pub fn value(&self, scope: &ScopeId, name: &str) -> Option<&Value> {
        self.resolved(scope).and_then(|resolved| resolved.get(name))
    }

    pub fn graph(&self, scope: &ScopeId) -> Result<DependencyGraph> {
        let state = self.state(scope)?;
        Ok(DependencyGraph::build(&state.definitions, &self.runtime.integrations.namespaces()))
    }

    pub fn schedule(&self, scope: &ScopeId) -> Result<Schedule> {
        Ok(schedule(&self.graph(scope)?, None))
    }

    /// Full resolution of one scope. Loading a page loads the global scope
    /// first if it has not been loaded yet.
    pub async fn load_scope(&mut self, scope: &ScopeId) -> Result<Resolution> {
        self.state(scope)?;
        if scope.page_name().is_some() && !self.scopes.get(&ScopeId::Global).map_or(false, |s| s.loaded) {
            self.resolve_scope(&ScopeId::Global).await?;
        }
        self.resolve_scope(scope).await
    }

    /// Loads the global scope and then every page.
    pub async fn load_all(&mut self) -> Result<Vec<(ScopeId, Resolution)>> {
        let ids: Vec<ScopeId> = self.scopes.keys().cloned().collect();
        let mut resolutions = Vec::with_capacity(ids.len());
        for id in ids {
            let resolution = self.resolve_scope(&id).await?;
            resolutions.push((id, resolution));
        }
        Ok(resolutions)
    }

    async fn resolve_scope(&mut self, scope: &ScopeId) -> Result<Resolution> {
        let Engine {
            runtime,
            scopes,
            persistence,
            hooks,
            ..
        } = self;

        let seed = match scope {
            ScopeId::Global => ResolvedScope::new(),
            ScopeId::Page(_) => scopes
                .get(&ScopeId::Global)
                .map(|global| global.resolved.clone())
                .unwrap_or_default(),
        };
        let state = scopes.get_mut(scope).ok_or_else(|| EngineError::unknown_scope(scope))?;

        match persistence.load_all(scope).await {
            Ok(stored) => {
                for (name, value) in stored {
                    match state.definitions.get_mut(&name) {
                        Some(definition) => {
                            let value = definition.clamp(value);
                            definition.freeze(value);
                        }
                        None => log::debug!("Ignoring stored value for undeclared '{}' in {}", name, scope),
                    }
                }
            }
            Err(e) => log::warn!("Could not load stored values for {}: {}", scope, e),
        }

        let hooks = &*hooks;
        let mut notify = |name: &str, value: &Value| hooks.borrow_mut().resolved(scope, name, value);
        let resolution = Resolver::new(runtime)
            .resolve_variables(&state.definitions, seed, Some(&mut notify), None)
            .await;

        state.resolved = resolution.scope.clone();
        state.loaded = true;
        log::info!(
            "Resolved {}: {} variable(s), {} diagnostic(s)",
            scope,
            resolution.order.len(),
            resolution.diagnostics.len()
        );
        Ok(resolution)
    }

    /// Runs a command script in `scope` and propagates its effects.
    /// Fails only for an unknown scope; script failures are reported in the
    /// outcome.
    pub async fn run_command(&mut self, scope: &ScopeId, script: &str) -> Result<CommandOutcome> {
        let mut outcome = {
            let Engine {
                runtime,
                scopes,
                persistence,
                hooks,
                ..
            } = self;
            let hooks = &*hooks;
            let state = scopes.get_mut(scope).ok_or_else(|| EngineError::unknown_scope(scope))?;

            let executor = CommandExecutor::new(runtime, &**persistence, hooks);
            let run = executor
                .run(scope, &mut state.definitions, &mut state.resolved, script)
                .await;

            let post_command = std::mem::take(&mut state.resolved);
            let mut notify = |name: &str, value: &Value| hooks.borrow_mut().resolved(scope, name, value);
            let (plan, resolution) = propagation::propagate(
                runtime,
                &state.definitions,
                post_command,
                &run.invoked_namespaces,
                &run.modified,
                Some(&mut notify),
            )
            .await;
            state.resolved = resolution.scope;

            CommandOutcome {
                value: run.value,
                error: run.error,
                modified: run.modified,
                affected: plan.affected,
                recomputed: resolution.order,
                refreshed: Vec::new(),
                broken_edges: resolution.broken_edges,
                diagnostics: resolution.diagnostics,
            }
        };

        if *scope == ScopeId::Global && !outcome.recomputed.is_empty() {
            let changed: HashSet<String> = outcome.recomputed.iter().cloned().collect();
            let (refreshed, diagnostics) = self.refresh_pages(&changed).await;
            outcome.refreshed = refreshed;
            outcome.diagnostics.extend(diagnostics);
        }
        Ok(outcome)
    }

    /// Pushes changed global values into loaded pages and re-evaluates the
    /// page variables that read them. Returns the re-evaluated names.
    async fn refresh_pages(&mut self, changed: &HashSet<String>) -> (Vec<(ScopeId, String)>, Vec<Diagnostic>) {
        let Engine {
            runtime,
            scopes,
            hooks,
            ..
        } = self;
        let hooks = &*hooks;
        let Some(global) = scopes.get(&ScopeId::Global).map(|g| g.resolved.clone()) else {
            return (Vec::new(), Vec::new());
        };

        let mut refreshed = Vec::new();
        let mut diagnostics = Vec::new();
        for (id, state) in scopes.iter_mut() {
            if id.page_name().is_none() || !state.loaded {
                continue;
            }
            let visible: HashSet<String> = changed
                .iter()
                .filter(|name| !state.definitions.contains(name))
                .cloned()
                .collect();
            if visible.is_empty() {
                continue;
            }
            for name in &visible {
                if let Some(value) = global.get(name) {
                    state.resolved.insert(name.clone(), value.clone());
                }
            }

            let readers = readers_of(&state.definitions, &visible);
            if readers.is_empty() {
                continue;
            }
            let graph = DependencyGraph::build(&state.definitions, &runtime.integrations.namespaces());
            let recompute = graph.reverse_closure(&readers);
            log::debug!("Refreshing {} variable(s) in {}", recompute.len(), id);

            let seed = std::mem::take(&mut state.resolved);
            let mut notify = |name: &str, value: &Value| hooks.borrow_mut().resolved(id, name, value);
            let resolution = Resolver::new(runtime)
                .resolve_with_graph(&state.definitions, &graph, seed, Some(&mut notify), Some(&recompute))
                .await;
            state.resolved = resolution.scope;
            refreshed.extend(resolution.order.into_iter().map(|name| (id.clone(), name)));
            diagnostics.extend(resolution.diagnostics);
        }
        (refreshed, diagnostics)
    }

    /// Runs a command declared in the scope's `commands` table.
    pub async fn run_named_command(&mut self, scope: &ScopeId, command: &str) -> Result<CommandOutcome> {
        let script = self
            .state(scope)?
            .commands
            .get(command)
            .cloned()
            .ok_or_else(|| EngineError::definition(command, format!("no such command in {}", scope)))?;
        self.run_command(scope, &script).await
    }

    /// Substitutes `{name}` placeholders in `text` with the scope's values.
    pub fn render_text(&self, scope: &ScopeId, text: &str) -> Result<String> {
        let state = self.state(scope)?;
        let lookup = |name: &str| {
            state
                .resolved
                .get(name)
                .cloned()
                .or_else(|| state.definitions.contains(name).then_some(Value::Null))
        };
        self.runtime.placeholders.expand(text, &lookup, PlaceholderMode::Display)
    }

    /// Renders a label declared in the scope's `labels` table.
    pub fn render_label(&self, scope: &ScopeId, label: &str) -> Result<String> {
        let text = self
            .state(scope)?
            .labels
            .get(label)
            .ok_or_else(|| EngineError::definition(label, format!("no such label in {}", scope)))?;
        self.render_text(scope, text)
    }

    /// Parses every expression and command of every scope. Returns the
    /// failures as `(location, error)` pairs.
    pub fn check(&self) -> Vec<(String, EngineError)> {
        let mut failures = Vec::new();
        for (id, state) in &self.scopes {
            for definition in state.definitions.iter() {
                if let Some(text) = definition.expression_text() {
                    if let Err(e) = self.runtime.check_syntax(text, SequencingMode::Expression) {
                        failures.push((format!("{}: {}", id, definition.name), e));
                    }
                }
            }
            for (name, script) in &state.commands {
                if let Err(e) = self.runtime.check_syntax(script, SequencingMode::Command) {
                    failures.push((format!("{}: command {}", id, name), e));
                }
            }
        }
        failures
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
