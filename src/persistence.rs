//! Persistence of command-driven overrides
//!
//! Every successful `setValue` / `addValue` writes the new value to the
//! engine's store. On load, stored values replace the declared rules of the
//! variables they name.

use crate::error::{EngineError, Result};
use crate::store::ScopeId;
use crate::value::Value;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type StoredValues = BTreeMap<String, Value>;

pub trait PersistenceStore {
    fn persist<'a>(&'a self, scope: &'a ScopeId, name: &'a str, value: &'a Value) -> LocalBoxFuture<'a, Result<()>>;

    fn load_all<'a>(&'a self, scope: &'a ScopeId) -> LocalBoxFuture<'a, Result<StoredValues>>;
}

/// Discards every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl PersistenceStore for NullStore {
    fn persist<'a>(&'a self, _scope: &'a ScopeId, _name: &'a str, _value: &'a Value) -> LocalBoxFuture<'a, Result<()>> {
        async { Ok(()) }.boxed_local()
    }

    fn load_all<'a>(&'a self, _scope: &'a ScopeId) -> LocalBoxFuture<'a, Result<StoredValues>> {
        async { Ok(StoredValues::new()) }.boxed_local()
    }
}

/// In-memory store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scopes: RefCell<BTreeMap<ScopeId, StoredValues>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &ScopeId, name: &str) -> Option<Value> {
        self.scopes.borrow().get(scope).and_then(|values| values.get(name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.scopes.borrow().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceStore for MemoryStore {
    fn persist<'a>(&'a self, scope: &'a ScopeId, name: &'a str, value: &'a Value) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            self.scopes
                .borrow_mut()
                .entry(scope.clone())
                .or_default()
                .insert(name.to_string(), value.clone());
            Ok(())
        }
        .boxed_local()
    }

    fn load_all<'a>(&'a self, scope: &'a ScopeId) -> LocalBoxFuture<'a, Result<StoredValues>> {
        async move { Ok(self.scopes.borrow().get(scope).cloned().unwrap_or_default()) }.boxed_local()
    }
}

/// JSON state file: `{ "global": { "hp": 10 }, "page:combat": { ... } }`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, StoredValues>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            EngineError::persistence(format!("invalid state file {}: {}", self.path.display(), e))
        })
    }

    fn write(&self, state: &BTreeMap<String, StoredValues>) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| EngineError::persistence(format!("failed to serialize state: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFileStore {
    fn persist<'a>(&'a self, scope: &'a ScopeId, name: &'a str, value: &'a Value) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            let mut state = self.read()?;
            state
                .entry(scope.storage_key())
                .or_default()
                .insert(name.to_string(), value.clone());
            self.write(&state)?;
            log::debug!("Persisted {}.{} to {}", scope, name, self.path.display());
            Ok(())
        }
        .boxed_local()
    }

    fn load_all<'a>(&'a self, scope: &'a ScopeId) -> LocalBoxFuture<'a, Result<StoredValues>> {
        async move {
            let mut state = self.read()?;
            Ok(state.remove(&scope.storage_key()).unwrap_or_default())
        }
        .boxed_local()
    }
}
