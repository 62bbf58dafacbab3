//! Integration namespaces consumed by expressions
//!
//! An integration is a named namespace of operations (`Dice.roll`,
//! `Sheet.get`, ...). Each operation declares at registration time whether
//! it is immediate or deferred; deferred operations return a future and
//! must be awaited, which the await sequencer arranges automatically.

use crate::error::{EngineError, Result};
use crate::value::Value;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

pub type ImmediateFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;
pub type DeferredFn = Rc<dyn Fn(Vec<Value>) -> LocalBoxFuture<'static, Result<Value>>>;

#[derive(Clone)]
enum OperationKind {
    Immediate(ImmediateFn),
    Deferred(DeferredFn),
}

/// One callable member of an integration namespace.
#[derive(Clone)]
pub struct Operation {
    pub name: String,
    pub is_async: bool,
    kind: OperationKind,
}

impl Operation {
    pub fn immediate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            is_async: false,
            kind: OperationKind::Immediate(Rc::new(f)),
        }
    }

    pub fn deferred<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        Self {
            name: name.into(),
            is_async: true,
            kind: OperationKind::Deferred(Rc::new(move |args| f(args).boxed_local())),
        }
    }

    /// Runs an immediate operation. Deferred operations yield `None`.
    pub fn call_immediate(&self, args: &[Value]) -> Option<Result<Value>> {
        match &self.kind {
            OperationKind::Immediate(f) => Some(f(args)),
            OperationKind::Deferred(_) => None,
        }
    }

    /// Runs the operation to completion regardless of its kind.
    pub fn invoke(&self, args: Vec<Value>) -> LocalBoxFuture<'static, Result<Value>> {
        match &self.kind {
            OperationKind::Immediate(f) => {
                let result = f(&args);
                async move { result }.boxed_local()
            }
            OperationKind::Deferred(f) => f(args),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// A namespace of operations.
#[derive(Debug, Clone)]
pub struct Integration {
    pub name: String,
    operations: BTreeMap<String, Operation>,
}

impl Integration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: BTreeMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.insert(operation.name.clone(), operation);
        self
    }

    pub fn immediate<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.with_operation(Operation::immediate(name, f))
    }

    pub fn deferred<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        self.with_operation(Operation::deferred(name, f))
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }
}

/// The registered integrations plus a version counter bumped on every
/// reconfiguration, used to invalidate derived caches.
#[derive(Debug, Default)]
pub struct IntegrationSet {
    integrations: BTreeMap<String, Integration>,
    version: u64,
}

impl IntegrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an integration.
    pub fn register(&mut self, integration: Integration) {
        log::info!(
            "Registering integration '{}' ({} operations)",
            integration.name,
            integration.operations.len()
        );
        self.integrations.insert(integration.name.clone(), integration);
        self.version += 1;
    }

    pub fn remove(&mut self, name: &str) -> Option<Integration> {
        let removed = self.integrations.remove(name);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.integrations.is_empty() {
            self.integrations.clear();
            self.version += 1;
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Integration> {
        self.integrations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.integrations.contains_key(name)
    }

    pub fn namespaces(&self) -> BTreeSet<String> {
        self.integrations.keys().cloned().collect()
    }

    /// Qualified names (`Ns.op`) of every deferred operation.
    pub fn async_call_sites(&self) -> Vec<String> {
        self.integrations
            .values()
            .flat_map(|integration| {
                integration
                    .operations()
                    .filter(|op| op.is_async)
                    .map(move |op| format!("{}.{}", integration.name, op.name))
            })
            .collect()
    }
}

/// Builds a lookup-table integration exposing `get(key)` and `keys()`.
/// Unknown keys fail the call.
pub fn table_integration(
    name: impl Into<String>,
    is_async: bool,
    values: BTreeMap<String, Value>,
) -> Integration {
    let name = name.into();
    let values = Rc::new(values);

    let lookup = {
        let values = Rc::clone(&values);
        let namespace = name.clone();
        move |args: &[Value]| -> Result<Value> {
            let key = args.first().map(Value::to_display_string).unwrap_or_default();
            values
                .get(&key)
                .cloned()
                .ok_or_else(|| EngineError::integration(&namespace, "get", format!("unknown key '{}'", key)))
        }
    };
    let keys = {
        let values = Rc::clone(&values);
        move |_: &[Value]| -> Result<Value> {
            Ok(Value::Array(values.keys().map(|k| Value::from(k.as_str())).collect()))
        }
    };

    let integration = Integration::new(name);
    if is_async {
        let lookup = Rc::new(lookup);
        let keys = Rc::new(keys);
        integration
            .deferred("get", move |args: Vec<Value>| {
                let result = lookup(&args);
                async move { result }
            })
            .deferred("keys", move |args: Vec<Value>| {
                let result = keys(&args);
                async move { result }
            })
    } else {
        integration.immediate("get", lookup).immediate("keys", keys)
    }
}
