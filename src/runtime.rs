//! Runtime settings backends.
//!
//! A runtime settings backend is any key/value store that can change while
//! the process is running (a settings table, a feature flag service). The
//! backend is injected into a [`Context`](crate::context::Context) and can be
//! swapped at any time.

use crate::error::{SettingsError, SettingsResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Key to value lookup used for the runtime settings source.
pub trait RuntimeSettings: Send + Sync {
    /// Look up a setting by its full name. `Ok(None)` means not set.
    fn get(&self, key: &str) -> SettingsResult<Option<Value>>;
}

/// Thread-safe in-memory runtime settings.
#[derive(Debug, Default)]
pub struct MapSettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn clear(&self) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RuntimeSettings for MapSettings {
    fn get(&self, key: &str) -> SettingsResult<Option<Value>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

impl RuntimeSettings for HashMap<String, Value> {
    fn get(&self, key: &str) -> SettingsResult<Option<Value>> {
        Ok(HashMap::get(self, key).cloned())
    }
}

impl<T: RuntimeSettings + ?Sized> RuntimeSettings for Arc<T> {
    fn get(&self, key: &str) -> SettingsResult<Option<Value>> {
        (**self).get(key)
    }
}

/// Backend that refuses every lookup.
///
/// Install it while the application is starting up, before the real backend
/// is available, then swap in the real backend. Any field that reaches for a
/// runtime setting in between fails loudly instead of silently falling back
/// to YAML or default values.
#[derive(Debug, Clone, Copy, Default)]
pub struct UninitializedRuntimeSettings;

impl RuntimeSettings for UninitializedRuntimeSettings {
    fn get(&self, key: &str) -> SettingsResult<Option<Value>> {
        Err(SettingsError::RuntimeSettingsUninitialized(key.to_string()))
    }
}
