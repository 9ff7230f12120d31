//! Named access to configuration singletons.
//!
//! A short name is first *registered* against a type name, then *resolved*
//! to the type published under that name on first access. Instances are
//! shared per type, so every name bound to the same type sees the same
//! memoized values and overrides.
//!
//! In reloading mode a resolved binding is checked against the type
//! currently published under its type name on each access and re-bound when
//! the type has been redeclared.

use crate::config::{ConfigType, Configuration, naming};
use crate::context::Context;
use crate::error::{SettingsError, SettingsResult};
use serde_json::Value as RawValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Raw override values for one configuration, keyed by field name.
pub type OverrideValues = HashMap<String, RawValue>;

#[derive(Clone)]
enum Binding {
    Registered(String),
    Resolved { type_name: String, ty: Arc<ConfigType> },
}

impl Binding {
    fn type_name(&self) -> &str {
        match self {
            Binding::Registered(type_name) | Binding::Resolved { type_name, .. } => type_name,
        }
    }

    fn resolves_to(&self, ty: &Arc<ConfigType>) -> bool {
        matches!(self, Binding::Resolved { ty: bound, .. } if Arc::ptr_eq(bound, ty))
    }

    fn same_as(&self, other: &Binding) -> bool {
        match (self, other) {
            (Binding::Registered(a), Binding::Registered(b)) => a == b,
            (Binding::Resolved { type_name: a, ty }, Binding::Resolved { type_name: b, .. }) => {
                a == b && other.resolves_to(ty)
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct State {
    types: HashMap<String, Arc<ConfigType>>,
    bindings: BTreeMap<String, Binding>,
    instances: HashMap<u64, Arc<Configuration>>,
}

pub struct Registry {
    context: Arc<Context>,
    reloading: AtomicBool,
    state: RwLock<State>,
}

impl Registry {
    /// Registry whose instances read through the process-wide context.
    pub fn new() -> Self {
        Self::with_context(Context::global())
    }

    pub fn with_context(context: Arc<Context>) -> Self {
        Self {
            context,
            reloading: AtomicBool::new(false),
            state: RwLock::new(State::default()),
        }
    }

    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable or disable rebinding of redeclared types.
    pub fn set_reloading(&self, reloading: bool) {
        self.reloading.store(reloading, Ordering::Relaxed);
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Relaxed)
    }

    /// Publish a type under its name, replacing any earlier type of that name.
    pub fn define(&self, ty: &Arc<ConfigType>) -> &Self {
        self.write()
            .types
            .insert(ty.name().to_string(), Arc::clone(ty));
        self
    }

    /// The type currently published under `type_name`.
    pub fn config_type(&self, type_name: &str) -> Option<Arc<ConfigType>> {
        self.read().types.get(type_name).cloned()
    }

    /// Register `name` against a type name, `<Name>Configuration` by default.
    /// The type only has to be published when the name is first accessed.
    pub fn add(&self, name: &str, type_name: Option<&str>) -> SettingsResult<()> {
        if !naming::is_valid_name(name) {
            return Err(SettingsError::InvalidConfigurationName(name.to_string()));
        }
        let type_name = match type_name {
            Some(type_name) => type_name.to_string(),
            None => naming::default_type_name(name),
        };
        self.write()
            .bindings
            .insert(name.to_string(), Binding::Registered(type_name));
        Ok(())
    }

    /// Register `name` directly against a type, publishing the type as well.
    pub fn add_type(&self, name: &str, ty: &Arc<ConfigType>) -> SettingsResult<()> {
        if !naming::is_valid_name(name) {
            return Err(SettingsError::InvalidConfigurationName(name.to_string()));
        }
        let mut state = self.write();
        state.types.insert(ty.name().to_string(), Arc::clone(ty));
        state.bindings.insert(
            name.to_string(),
            Binding::Resolved {
                type_name: ty.name().to_string(),
                ty: Arc::clone(ty),
            },
        );
        Ok(())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.read().bindings.keys().cloned().collect()
    }

    pub fn includes(&self, name: &str) -> bool {
        self.read().bindings.contains_key(name)
    }

    /// The singleton for a registered name.
    pub fn get(&self, name: &str) -> SettingsResult<Arc<Configuration>> {
        let binding = self
            .read()
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| SettingsError::UnknownConfiguration(name.to_string()))?;

        let ty = match &binding {
            Binding::Resolved { type_name, ty } => match self.stale_binding(type_name, ty) {
                Some(current) => {
                    info!(name, type_name = %type_name, "Configuration type redeclared, rebinding");
                    if !self.bind(name, &binding, &current) {
                        return self.get(name);
                    }
                    current
                }
                None => Arc::clone(ty),
            },
            Binding::Registered(type_name) => {
                let ty = self
                    .config_type(type_name)
                    .ok_or_else(|| SettingsError::UnknownConfigurationType(type_name.clone()))?;
                info!(name, type_name = %type_name, "Resolved configuration");
                if !self.bind(name, &binding, &ty) {
                    return self.get(name);
                }
                ty
            }
        };

        Ok(self.instance(&ty))
    }

    fn stale_binding(&self, type_name: &str, ty: &Arc<ConfigType>) -> Option<Arc<ConfigType>> {
        if !self.is_reloading() {
            return None;
        }
        self.config_type(type_name)
            .filter(|current| !Arc::ptr_eq(current, ty))
    }

    /// Resolve `name` to `ty`, unless the binding changed since it was read as `seen`.
    ///
    /// Drops the instance of a replaced type once no name resolves to it.
    fn bind(&self, name: &str, seen: &Binding, ty: &Arc<ConfigType>) -> bool {
        let mut state = self.write();
        if !state.bindings.get(name).is_some_and(|current| current.same_as(seen)) {
            return false;
        }
        let replaced = state.bindings.insert(
            name.to_string(),
            Binding::Resolved {
                type_name: seen.type_name().to_string(),
                ty: Arc::clone(ty),
            },
        );
        if let Some(Binding::Resolved { ty: old, .. }) = replaced
            && !Arc::ptr_eq(&old, ty)
            && !state.bindings.values().any(|b| b.resolves_to(&old))
        {
            state.instances.remove(&old.id());
        }
        true
    }

    /// The shared instance of `ty`, created on first use.
    pub fn instance(&self, ty: &Arc<ConfigType>) -> Arc<Configuration> {
        if let Some(instance) = self.read().instances.get(&ty.id()) {
            return Arc::clone(instance);
        }
        let mut state = self.write();
        let instance = state.instances.entry(ty.id()).or_insert_with(|| {
            Arc::new(Configuration::with_context(
                Arc::clone(ty),
                Arc::clone(&self.context),
            ))
        });
        Arc::clone(instance)
    }

    /// Run `f` with values of one configuration forced on the current thread.
    pub fn override_values<I, K, V, R>(
        &self,
        name: &str,
        values: I,
        f: impl FnOnce() -> R,
    ) -> SettingsResult<R>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<RawValue>,
    {
        let config = self.get(name)?;
        Ok(config.with_overrides(values, f))
    }

    /// Run `f` with values of several configurations forced on the current
    /// thread. All names are resolved before any override is applied.
    pub fn override_many<I, N, R>(&self, overrides: I, f: impl FnOnce() -> R) -> SettingsResult<R>
    where
        I: IntoIterator<Item = (N, OverrideValues)>,
        N: AsRef<str>,
    {
        let scopes = overrides
            .into_iter()
            .map(|(name, values)| Ok((self.get(name.as_ref())?, values)))
            .collect::<SettingsResult<Vec<_>>>()?;
        Ok(nest_overrides(&scopes, Box::new(f)))
    }

    /// Drop every binding, published type, and instance.
    pub fn reset(&self) {
        let mut state = self.write();
        state.types.clear();
        state.bindings.clear();
        state.instances.clear();
    }
}

fn nest_overrides<'a, R>(
    scopes: &'a [(Arc<Configuration>, OverrideValues)],
    f: Box<dyn FnOnce() -> R + 'a>,
) -> R {
    match scopes.split_first() {
        None => f(),
        Some(((config, values), rest)) => {
            config.with_overrides(values.clone(), move || nest_overrides(rest, f))
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .field("reloading", &self.is_reloading())
            .finish()
    }
}
