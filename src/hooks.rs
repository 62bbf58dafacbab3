//! Result callback sink
//!
//! The host registers render callbacks here. `on_resolved` fires once per
//! variable evaluated in any resolution pass (initial load and change
//! propagation alike); `on_modified` fires for each successful
//! `setValue` / `addValue`. Callbacks run synchronously, in the order the
//! values are produced.

use crate::store::ScopeId;
use crate::value::Value;

pub type RenderCallback = Box<dyn FnMut(&ScopeId, &str, &Value)>;

#[derive(Default)]
pub struct RenderHooks {
    on_resolved: Option<RenderCallback>,
    on_modified: Option<RenderCallback>,
}

impl RenderHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_resolved(&mut self, callback: impl FnMut(&ScopeId, &str, &Value) + 'static) {
        self.on_resolved = Some(Box::new(callback));
    }

    pub fn set_on_modified(&mut self, callback: impl FnMut(&ScopeId, &str, &Value) + 'static) {
        self.on_modified = Some(Box::new(callback));
    }

    pub fn clear(&mut self) {
        self.on_resolved = None;
        self.on_modified = None;
    }

    pub fn resolved(&mut self, scope: &ScopeId, name: &str, value: &Value) {
        if let Some(callback) = self.on_resolved.as_mut() {
            callback(scope, name, value);
        }
    }

    pub fn modified(&mut self, scope: &ScopeId, name: &str, value: &Value) {
        if let Some(callback) = self.on_modified.as_mut() {
            callback(scope, name, value);
        }
    }
}

impl std::fmt::Debug for RenderHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHooks")
            .field("on_resolved", &self.on_resolved.is_some())
            .field("on_modified", &self.on_modified.is_some())
            .finish()
    }
}
