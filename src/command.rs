//! Command execution
//!
//! A command is a script run once in a scope with `setValue` and
//! `addValue` available. Each mutation clamps the value into the target's
//! bounds, freezes the target to that literal, updates the resolved scope,
//! persists the value and records the name in the modified set. The
//! caller then propagates the changes.

use crate::error::{EngineError, Result};
use crate::evaluator::{EvalContext, Evaluator, MutationPrimitives, Runtime};
use crate::hooks::RenderHooks;
use crate::persistence::PersistenceStore;
use crate::sequencer::SequencingMode;
use crate::store::{ResolvedScope, ScopeId, VariableSet};
use crate::value::Value;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::BTreeSet;

/// What one command script did, before propagation.
#[derive(Debug, Default)]
pub struct CommandRun {
    /// Value of the script's last statement, if it completed.
    pub value: Option<Value>,
    pub error: Option<EngineError>,
    /// Variables written by `setValue` / `addValue`, in name order.
    pub modified: BTreeSet<String>,
    /// Integration namespaces the script text invokes.
    pub invoked_namespaces: BTreeSet<String>,
}

impl CommandRun {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Mutable state one command run works on.
struct CommandSession<'a> {
    scope_id: &'a ScopeId,
    definitions: RefCell<&'a mut VariableSet>,
    resolved: &'a RefCell<ResolvedScope>,
    modified: RefCell<BTreeSet<String>>,
    persistence: &'a dyn PersistenceStore,
    hooks: &'a RefCell<RenderHooks>,
}

impl<'a> CommandSession<'a> {
    async fn write(&self, name: String, value: Value) -> Result<Value> {
        let stored = {
            let mut definitions = self.definitions.borrow_mut();
            let definition = definitions.get_mut(&name).ok_or_else(|| {
                log::warn!("Command in {} writes undeclared variable '{}'", self.scope_id, name);
                EngineError::unknown_variable(&name)
            })?;
            let clamped = definition.clamp(value);
            definition.freeze(clamped.clone());
            clamped
        };

        self.resolved.borrow_mut().insert(name.clone(), stored.clone());
        self.modified.borrow_mut().insert(name.clone());
        log::debug!("{}: {} = {}", self.scope_id, name, stored);

        if let Err(e) = self.persistence.persist(self.scope_id, &name, &stored).await {
            log::error!("Failed to persist {}.{}: {}", self.scope_id, name, e);
        }

        {
            let mut hooks = self.hooks.borrow_mut();
            hooks.modified(self.scope_id, &name, &stored);
            hooks.resolved(self.scope_id, &name, &stored);
        }
        Ok(stored)
    }

    fn current(&self, name: &str) -> Result<f64> {
        if !self.definitions.borrow().contains(name) {
            return Err(EngineError::unknown_variable(name));
        }
        Ok(self
            .resolved
            .borrow()
            .get(name)
            .and_then(Value::as_number)
            .unwrap_or(0.0))
    }
}

impl<'a> MutationPrimitives for CommandSession<'a> {
    fn set_value(&self, name: String, value: Value) -> LocalBoxFuture<'_, Result<Value>> {
        self.write(name, value).boxed_local()
    }

    fn add_value(&self, name: String, delta: Value) -> LocalBoxFuture<'_, Result<Value>> {
        async move {
            let current = self.current(&name)?;
            let delta = match delta {
                Value::Number(n) => n,
                other => {
                    let n = other.to_number();
                    if n.is_nan() {
                        return Err(EngineError::evaluation(format!(
                            "addValue('{}') expects a number, got {}",
                            name,
                            other.type_name()
                        )));
                    }
                    n
                }
            };
            self.write(name, Value::Number(current + delta)).await
        }
        .boxed_local()
    }
}

pub struct CommandExecutor<'a> {
    runtime: &'a Runtime,
    persistence: &'a dyn PersistenceStore,
    hooks: &'a RefCell<RenderHooks>,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(runtime: &'a Runtime, persistence: &'a dyn PersistenceStore, hooks: &'a RefCell<RenderHooks>) -> Self {
        Self {
            runtime,
            persistence,
            hooks,
        }
    }

    /// Runs `script` against one scope. Mutations made before a failure
    /// stay in place and are reported in `modified`.
    pub async fn run(
        &self,
        scope_id: &ScopeId,
        definitions: &mut VariableSet,
        resolved: &mut ResolvedScope,
        script: &str,
    ) -> CommandRun {
        let invoked_namespaces = self
            .runtime
            .sequencer
            .invoked_namespaces(&self.runtime.integrations, script);
        let mut declared = definitions.name_set();
        declared.extend(resolved.keys().cloned());

        let scope = RefCell::new(std::mem::take(resolved));
        let session = CommandSession {
            scope_id,
            definitions: RefCell::new(definitions),
            resolved: &scope,
            modified: RefCell::new(BTreeSet::new()),
            persistence: self.persistence,
            hooks: self.hooks,
        };

        log::info!("Running command in {}", scope_id);
        let outcome = {
            let evaluator = Evaluator::new(EvalContext {
                runtime: self.runtime,
                scope: &scope,
                declared: &declared,
                primitives: Some(&session),
            });
            evaluator.evaluate(script, SequencingMode::Command).await
        };

        let modified = session.modified.take();
        drop(session);
        *resolved = scope.into_inner();

        let (value, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(e) => {
                log::warn!("Command in {} failed: {}", scope_id, e);
                (None, Some(e))
            }
        };
        CommandRun {
            value,
            error,
            modified,
            invoked_namespaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{Integration, IntegrationSet};
    use crate::persistence::MemoryStore;
    use crate::store::VariableDefinition;
    use std::rc::Rc;

    fn definitions() -> VariableSet {
        vec![
            VariableDefinition::literal("hp", 10.0).with_bounds(Some(0.0), Some(50.0)),
            VariableDefinition::expression("max_hp", "hp * 2"),
            VariableDefinition::literal("label", "x"),
        ]
        .into_iter()
        .collect()
    }

    fn resolved() -> ResolvedScope {
        let mut scope = ResolvedScope::new();
        scope.insert("hp".to_string(), Value::Number(10.0));
        scope.insert("max_hp".to_string(), Value::Number(20.0));
        scope.insert("label".to_string(), Value::from("x"));
        scope
    }

    #[tokio::test]
    async fn test_set_value_clamps_freezes_and_persists() {
        let runtime = Runtime::new();
        let store = MemoryStore::new();
        let hooks = RefCell::new(RenderHooks::new());
        let executor = CommandExecutor::new(&runtime, &store, &hooks);
        let mut defs = definitions();
        let mut scope = resolved();

        let run = executor
            .run(&ScopeId::Global, &mut defs, &mut scope, "setValue('hp', 100); setValue('max_hp', 7)")
            .await;

        assert!(run.is_ok());
        assert_eq!(scope["hp"], Value::Number(50.0));
        assert_eq!(scope["max_hp"], Value::Number(7.0));
        assert!(defs.get("max_hp").unwrap().is_literal());
        assert_eq!(store.get(&ScopeId::Global, "hp"), Some(Value::Number(50.0)));
        assert_eq!(run.modified.into_iter().collect::<Vec<_>>(), vec!["hp", "max_hp"]);
    }

    #[tokio::test]
    async fn test_add_value_uses_current_value() {
        let runtime = Runtime::new();
        let store = MemoryStore::new();
        let hooks = RefCell::new(RenderHooks::new());
        let executor = CommandExecutor::new(&runtime, &store, &hooks);
        let mut defs = definitions();
        let mut scope = resolved();

        let run = executor
            .run(&ScopeId::Global, &mut defs, &mut scope, "addValue('hp', -4); addValue('label', 2)")
            .await;
        assert!(run.is_ok());
        assert_eq!(scope["hp"], Value::Number(6.0));
        assert_eq!(scope["label"], Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_unknown_variable_aborts_after_earlier_writes() {
        let runtime = Runtime::new();
        let store = MemoryStore::new();
        let hooks = RefCell::new(RenderHooks::new());
        let executor = CommandExecutor::new(&runtime, &store, &hooks);
        let mut defs = definitions();
        let mut scope = resolved();

        let run = executor
            .run(
                &ScopeId::Global,
                &mut defs,
                &mut scope,
                "setValue('hp', 1); setValue('nope', 2); setValue('hp', 3)",
            )
            .await;
        assert!(matches!(run.error, Some(EngineError::UnknownVariable { ref name }) if name == "nope"));
        assert_eq!(scope["hp"], Value::Number(1.0));
        assert!(run.modified.contains("hp"));
    }

    #[tokio::test]
    async fn test_hooks_fire_per_mutation() {
        let runtime = Runtime::new();
        let store = MemoryStore::new();
        let hooks = RefCell::new(RenderHooks::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            hooks
                .borrow_mut()
                .set_on_modified(move |_, name, value| seen.borrow_mut().push((name.to_string(), value.clone())));
        }
        let executor = CommandExecutor::new(&runtime, &store, &hooks);
        let mut defs = definitions();
        let mut scope = resolved();
        executor
            .run(&ScopeId::Global, &mut defs, &mut scope, "setValue('hp', 3); addValue('hp', 1)")
            .await;
        assert_eq!(
            *seen.borrow(),
            vec![
                ("hp".to_string(), Value::Number(3.0)),
                ("hp".to_string(), Value::Number(4.0))
            ]
        );
    }

    #[tokio::test]
    async fn test_invoked_namespaces_are_reported() {
        let mut integrations = IntegrationSet::new();
        integrations.register(Integration::new("Dice").deferred("roll", |_| async { Ok(Value::Number(4.0)) }));
        let runtime = Runtime::with_integrations(integrations);
        let store = MemoryStore::new();
        let hooks = RefCell::new(RenderHooks::new());
        let executor = CommandExecutor::new(&runtime, &store, &hooks);
        let mut defs = definitions();
        let mut scope = resolved();

        let run = executor
            .run(&ScopeId::Global, &mut defs, &mut scope, "addValue('hp', Dice.roll(6))")
            .await;
        assert!(run.is_ok());
        assert_eq!(scope["hp"], Value::Number(14.0));
        assert!(run.invoked_namespaces.contains("Dice"));
    }
}
