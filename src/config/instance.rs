//! Configuration instances: value resolution, memoization, and overrides.

use super::definition::ConfigType;
use super::loader::YamlMap;
use crate::coerce::{FromValue, Value};
use crate::context::{Context, RuntimeBackend};
use crate::error::{SettingsError, SettingsResult};
use crate::field::{Field, Resolved, Sources};
use crate::sources::Source;
use serde_json::Value as RawValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Prefix of obfuscated secret values in snapshots.
pub const SECURE_HASH_PREFIX: &str = "securehash:";

const SECURE_HASH_SALT: &str = "layered-settings";

/// Keyed, non-reversible digest of a secret value. Equal inputs give equal
/// outputs, so snapshots from different environments stay comparable.
pub fn secure_hash(value: &str) -> String {
    let inner = hex::encode(Sha256::digest(value.as_bytes()));
    let mut hasher = Sha256::new();
    hasher.update(SECURE_HASH_SALT.as_bytes());
    hasher.update(inner.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", SECURE_HASH_PREFIX, &digest[..32])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type OverrideMap = HashMap<String, RawValue>;

/// An instance of a [`ConfigType`] bound to a [`Context`].
pub struct Configuration {
    ty: Arc<ConfigType>,
    context: Arc<Context>,
    memoized: Mutex<HashMap<String, Option<Value>>>,
    yaml: OnceLock<YamlMap>,
    overrides: Mutex<HashMap<ThreadId, OverrideMap>>,
}

impl Configuration {
    /// Instance reading through the process-wide context.
    pub fn new(ty: Arc<ConfigType>) -> Self {
        Self::with_context(ty, Context::global())
    }

    pub fn with_context(ty: Arc<ConfigType>, context: Arc<Context>) -> Self {
        Self {
            ty,
            context,
            memoized: Mutex::new(HashMap::new()),
            yaml: OnceLock::new(),
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn config_type(&self) -> &Arc<ConfigType> {
        &self.ty
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn includes(&self, name: &str) -> bool {
        self.ty.includes(name)
    }

    /// Current value of a field. Unknown fields read as `None`.
    ///
    /// Fails if a non-static field is read while the application is
    /// initializing, or if the runtime settings backend fails.
    pub fn get(&self, name: &str) -> SettingsResult<Option<Value>> {
        let Some(field) = self.ty.get_field(name) else {
            return Ok(None);
        };

        if let Some(raw) = self.override_value(name) {
            let value = field
                .coerce(&raw)
                .filter(|value| !field.uses_default(value))
                .or_else(|| field.default().cloned());
            return Ok(value);
        }

        if field.is_static() {
            if let Some(value) = lock(&self.memoized).get(name) {
                return Ok(value.clone());
            }
        } else {
            self.context.ensure_initialized(self.ty.name(), name)?;
        }

        let resolved = self.resolve(&field)?;
        debug!(
            config = %self.ty.name(),
            field = name,
            source = %resolved.source,
            "Resolved setting"
        );

        if field.is_static() {
            let mut memoized = lock(&self.memoized);
            let value = memoized
                .entry(name.to_string())
                .or_insert(resolved.value);
            return Ok(value.clone());
        }

        Ok(resolved.value)
    }

    /// Current value extracted as a concrete type.
    pub fn get_as<T: FromValue>(&self, name: &str) -> SettingsResult<Option<T>> {
        Ok(self.get(name)?.and_then(T::from_value))
    }

    /// Truthiness of a field: `false` when unset or not a boolean.
    pub fn flag(&self, name: &str) -> SettingsResult<bool> {
        Ok(self.get(name)?.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Which source supplies the field's current value.
    pub fn source(&self, name: &str) -> SettingsResult<Source> {
        let field = self.require_field(name)?;
        Ok(self.resolve(&field)?.source)
    }

    /// The value the field would have if `source` were the only source.
    /// Falls back to the default like normal resolution does.
    pub fn value_from_source(&self, name: &str, source: Source) -> SettingsResult<Option<Value>> {
        let field = self.require_field(name)?;
        let backend = self.runtime_backend(&field);
        let sources = match source {
            Source::Env => Sources::new().with_env(self.context.env()),
            Source::Runtime => match &backend {
                Some(backend) => Sources::new().with_runtime(&***backend),
                None => Sources::new(),
            },
            Source::Yaml => Sources::new().with_yaml(self.yaml_config()),
            Source::Default => return Ok(field.default().cloned()),
        };
        field.value(&sources)
    }

    /// Sources the field can be read from, in priority order.
    pub fn available_sources(&self, name: &str) -> SettingsResult<Vec<Source>> {
        let field = self.require_field(name)?;
        let mut sources = Vec::new();
        if field.env_var().is_some() {
            sources.push(Source::Env);
        }
        if field.runtime_setting().is_some() && self.runtime_allowed(&field) {
            sources.push(Source::Runtime);
        }
        if field.yaml_key().is_some() {
            sources.push(Source::Yaml);
        }
        if field.default().is_some() {
            sources.push(Source::Default);
        }
        Ok(sources)
    }

    /// Snapshot of every field. Secret values are replaced by [`secure_hash`].
    pub fn to_hash(&self) -> SettingsResult<BTreeMap<String, RawValue>> {
        let secret_by_default = self.ty.fields_secret_by_default();
        let mut payload = BTreeMap::new();
        for field in self.ty.fields() {
            let value = self.get(field.name())?;
            let raw = match value {
                Some(value) if field.is_secret(secret_by_default) => {
                    RawValue::String(secure_hash(&value.to_string()))
                }
                Some(value) => value.to_raw(),
                None => RawValue::Null,
            };
            payload.insert(field.name().to_string(), raw);
        }
        Ok(payload)
    }

    /// Forget memoized static values.
    pub fn reset_memoized(&self) {
        lock(&self.memoized).clear();
    }

    /// Run `f` with field values forced on the current thread.
    ///
    /// Values are raw and coerced like any other source. Scopes nest; the
    /// previous overrides are restored when `f` returns or panics. Other
    /// threads are unaffected.
    pub fn with_overrides<I, K, V, R>(&self, values: I, f: impl FnOnce() -> R) -> R
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RawValue>,
    {
        let thread = thread::current().id();
        let previous = lock(&self.overrides).get(&thread).cloned();

        let mut scoped = previous.clone().unwrap_or_default();
        for (key, value) in values {
            scoped.insert(key.into(), value.into());
        }
        lock(&self.overrides).insert(thread, scoped);

        let _guard = OverrideGuard {
            overrides: &self.overrides,
            thread,
            previous,
        };
        f()
    }

    fn override_value(&self, name: &str) -> Option<RawValue> {
        lock(&self.overrides)
            .get(&thread::current().id())
            .and_then(|values| values.get(name).cloned())
    }

    fn require_field(&self, name: &str) -> SettingsResult<Arc<Field>> {
        self.ty
            .get_field(name)
            .ok_or_else(|| SettingsError::UnknownField(name.to_string()))
    }

    /// Secret fields skip runtime settings the context does not trust.
    fn runtime_allowed(&self, field: &Field) -> bool {
        self.context.runtime_settings_secure()
            || !field.is_secret(self.ty.fields_secret_by_default())
    }

    fn runtime_backend(&self, field: &Field) -> Option<RuntimeBackend> {
        if field.runtime_setting().is_none() || !self.runtime_allowed(field) {
            return None;
        }
        self.context.runtime_settings()
    }

    fn resolve(&self, field: &Field) -> SettingsResult<Resolved> {
        let backend = self.runtime_backend(field);
        let mut sources = Sources::new();
        if field.env_var().is_some() {
            sources = sources.with_env(self.context.env());
        }
        if let Some(backend) = &backend {
            sources = sources.with_runtime(&***backend);
        }
        if field.yaml_key().is_some() {
            sources = sources.with_yaml(self.yaml_config());
        }
        field.resolve(&sources)
    }

    /// Flattened YAML for this instance, read on first use.
    fn yaml_config(&self) -> &YamlMap {
        self.yaml.get_or_init(|| {
            let Some(path) = self.ty.configuration_file() else {
                return YamlMap::new();
            };
            self.context
                .yaml_loader()
                .load(&path, &self.ty.yaml_config_env())
                .unwrap_or_default()
        })
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("type", &self.ty.name())
            .field("memoized", &lock(&self.memoized).len())
            .field("yaml_loaded", &self.yaml.get().is_some())
            .finish()
    }
}

struct OverrideGuard<'a> {
    overrides: &'a Mutex<HashMap<ThreadId, OverrideMap>>,
    thread: ThreadId,
    previous: Option<OverrideMap>,
}

impl Drop for OverrideGuard<'_> {
    fn drop(&mut self) {
        let mut overrides = lock(self.overrides);
        match self.previous.take() {
            Some(previous) => {
                overrides.insert(self.thread, previous);
            }
            None => {
                overrides.remove(&self.thread);
            }
        }
    }
}
