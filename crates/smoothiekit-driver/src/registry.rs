//! Controller registry
//!
//! Maps connection identities to live driver handles. Owned by the
//! embedding engine and passed into `spawn`; a driver task removes itself
//! on exit, so a looked-up handle always points at a running task.

use crate::service::DriverHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared registry of running controllers, keyed by connection identity
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    inner: Arc<Mutex<HashMap<String, DriverHandle>>>,
}

impl ControllerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its identity
    pub fn insert(&self, handle: DriverHandle) {
        self.inner
            .lock()
            .insert(handle.ident().to_string(), handle);
    }

    /// Look up a handle
    pub fn get(&self, ident: &str) -> Option<DriverHandle> {
        self.inner.lock().get(ident).cloned()
    }

    /// Remove a handle
    pub fn remove(&self, ident: &str) -> Option<DriverHandle> {
        self.inner.lock().remove(ident)
    }

    /// Identities of all registered controllers
    pub fn idents(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Number of registered controllers
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
