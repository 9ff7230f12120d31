//! Configuration types: field declarations and inheritable naming settings.
//!
//! A [`ConfigType`] is the schema applications declare their settings on.
//! Types form a tree rooted at [`ConfigType::root`]. A subtype sees every
//! field of its ancestors; declaring a field with the same name replaces the
//! inherited definition for the subtype only, and derives its lookup keys
//! from the subtype's own naming settings.

use super::naming;
use super::settings::{
    ClassSettings, DEFAULT_ENV_VAR_DELIMITER, DEFAULT_ENV_VAR_UPCASE, DEFAULT_FIELDS_SECRET,
    DEFAULT_RUNTIME_SETTING_DELIMITER, DEFAULT_RUNTIME_SETTING_UPCASE, DEFAULT_YAML_CONFIG_ENV,
    OwnSettings,
};
use crate::coerce::{FieldType, Value};
use crate::error::{SettingsError, SettingsResult};
use crate::field::{DefaultPredicate, Field, Secret};
use serde_json::Value as RawValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::trace;

static NEXT_TYPE_ID: AtomicU64 = AtomicU64::new(1);

static ROOT: LazyLock<Arc<ConfigType>> = LazyLock::new(ConfigType::new_base);

/// How a field finds its key for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SourceKey {
    /// Derive the key from naming conventions, unless the source is
    /// disabled for the type.
    #[default]
    Auto,
    /// Derive the key even if the source is disabled for the type.
    Enabled,
    /// Never read this source for this field.
    Disabled,
    /// Use exactly this key.
    Named(String),
}

impl From<bool> for SourceKey {
    fn from(value: bool) -> Self {
        if value {
            SourceKey::Enabled
        } else {
            SourceKey::Disabled
        }
    }
}

impl From<&str> for SourceKey {
    fn from(value: &str) -> Self {
        SourceKey::Named(value.to_string())
    }
}

impl From<String> for SourceKey {
    fn from(value: String) -> Self {
        SourceKey::Named(value)
    }
}

/// A field type given either directly or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Known(FieldType),
    Named(String),
}

impl TypeSpec {
    fn resolve(&self) -> SettingsResult<FieldType> {
        match self {
            TypeSpec::Known(t) => Ok(*t),
            TypeSpec::Named(name) => name.parse(),
        }
    }
}

impl From<FieldType> for TypeSpec {
    fn from(value: FieldType) -> Self {
        TypeSpec::Known(value)
    }
}

impl From<&str> for TypeSpec {
    fn from(value: &str) -> Self {
        TypeSpec::Named(value.to_string())
    }
}

/// Condition under which a resolved value is replaced by the default.
#[derive(Clone)]
pub enum DefaultIf {
    Predicate(DefaultPredicate),
    /// A predicate registered on the type with [`ConfigType::define_predicate`].
    Method(String),
}

/// Options for [`ConfigType::field`].
#[derive(Clone, Default)]
pub struct FieldOptions {
    field_type: Option<TypeSpec>,
    description: Option<String>,
    default: Option<RawValue>,
    default_if: Option<DefaultIf>,
    is_static: bool,
    secret: Secret,
    env_var: SourceKey,
    runtime_setting: SourceKey,
    yaml_key: SourceKey,
}

impl FieldOptions {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    pub fn of_type(mut self, field_type: impl Into<TypeSpec>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default(mut self, value: impl Into<RawValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_if(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.default_if = Some(DefaultIf::Predicate(Arc::new(predicate)));
        self
    }

    pub fn default_if_method(mut self, name: impl Into<String>) -> Self {
        self.default_if = Some(DefaultIf::Method(name.into()));
        self
    }

    /// Resolve once per instance and never read runtime settings.
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn secret(mut self, secret: impl Into<Secret>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn secret_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.secret = Secret::When(Arc::new(predicate));
        self
    }

    pub fn env_var(mut self, key: impl Into<SourceKey>) -> Self {
        self.env_var = key.into();
        self
    }

    pub fn runtime_setting(mut self, key: impl Into<SourceKey>) -> Self {
        self.runtime_setting = key.into();
        self
    }

    pub fn yaml_key(mut self, key: impl Into<SourceKey>) -> Self {
        self.yaml_key = key.into();
        self
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A declared configuration schema.
pub struct ConfigType {
    me: Weak<ConfigType>,
    id: u64,
    name: String,
    parent: Option<Arc<ConfigType>>,
    settings: RwLock<ClassSettings>,
    own: RwLock<OwnSettings>,
    fields: RwLock<Vec<Arc<Field>>>,
    predicates: RwLock<HashMap<String, DefaultPredicate>>,
    children: RwLock<Vec<Weak<ConfigType>>>,
}

impl ConfigType {
    /// The process-wide root type. Its settings act as global defaults.
    pub fn root() -> Arc<ConfigType> {
        Arc::clone(&ROOT)
    }

    /// A new parentless root, independent of the process-wide one.
    pub fn new_base() -> Arc<ConfigType> {
        Self::build("Configuration".to_string(), None)
    }

    /// Declare a type directly under the process-wide root.
    pub fn new(name: impl Into<String>) -> Arc<ConfigType> {
        Self::inherit(&Self::root(), name)
    }

    /// Declare a subtype of `parent`.
    pub fn inherit(parent: &Arc<ConfigType>, name: impl Into<String>) -> Arc<ConfigType> {
        let ty = Self::build(name.into(), Some(Arc::clone(parent)));
        let mut children = write(&parent.children);
        children.retain(|child| child.strong_count() > 0);
        children.push(Arc::downgrade(&ty));
        ty
    }

    fn build(name: String, parent: Option<Arc<ConfigType>>) -> Arc<ConfigType> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id: NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            parent,
            settings: RwLock::new(ClassSettings::default()),
            own: RwLock::new(OwnSettings::default()),
            fields: RwLock::new(Vec::new()),
            predicates: RwLock::new(HashMap::new()),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Identity of this type; redeclaring a type with the same name yields a new id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ConfigType>> {
        self.parent.as_ref()
    }

    /// This type followed by its ancestors.
    fn lineage(&self) -> impl Iterator<Item = &ConfigType> {
        std::iter::successors(Some(self), |ty| ty.parent.as_deref())
    }

    pub fn is_descendant_of(&self, other: &ConfigType) -> bool {
        self.lineage().skip(1).any(|ty| ty.id == other.id)
    }

    /// Every live type declared below this one, depth first.
    pub fn descendants(&self) -> Vec<Arc<ConfigType>> {
        let children: Vec<Arc<ConfigType>> =
            read(&self.children).iter().filter_map(Weak::upgrade).collect();
        let mut out = Vec::new();
        for child in children {
            let nested = child.descendants();
            out.push(child);
            out.extend(nested);
        }
        out
    }

    /// Change inherited settings on this type.
    pub fn configure(&self, update: impl FnOnce(&mut ClassSettings)) -> &Self {
        update(&mut write(&self.settings));
        self
    }

    fn inherited<T>(&self, get: impl Fn(&ClassSettings) -> Option<T>) -> Option<T> {
        self.lineage().find_map(|ty| get(&read(&ty.settings)))
    }

    pub fn environment_variables_disabled(&self) -> bool {
        self.inherited(|s| s.environment_variables_disabled)
            .unwrap_or(false)
    }

    pub fn runtime_settings_disabled(&self) -> bool {
        self.inherited(|s| s.runtime_settings_disabled)
            .unwrap_or(false)
    }

    pub fn yaml_config_disabled(&self) -> bool {
        self.inherited(|s| s.yaml_config_disabled).unwrap_or(false)
    }

    pub fn env_var_delimiter(&self) -> String {
        self.inherited(|s| s.env_var_delimiter.clone())
            .unwrap_or_else(|| DEFAULT_ENV_VAR_DELIMITER.to_string())
    }

    pub fn runtime_setting_delimiter(&self) -> String {
        self.inherited(|s| s.runtime_setting_delimiter.clone())
            .unwrap_or_else(|| DEFAULT_RUNTIME_SETTING_DELIMITER.to_string())
    }

    pub fn env_var_upcase(&self) -> bool {
        self.inherited(|s| s.env_var_upcase)
            .unwrap_or(DEFAULT_ENV_VAR_UPCASE)
    }

    pub fn runtime_setting_upcase(&self) -> bool {
        self.inherited(|s| s.runtime_setting_upcase)
            .unwrap_or(DEFAULT_RUNTIME_SETTING_UPCASE)
    }

    pub fn yaml_config_path(&self) -> Option<PathBuf> {
        self.inherited(|s| s.yaml_config_path.clone())
    }

    pub fn yaml_config_env(&self) -> String {
        self.inherited(|s| s.yaml_config_env.clone())
            .unwrap_or_else(|| DEFAULT_YAML_CONFIG_ENV.to_string())
    }

    pub fn fields_secret_by_default(&self) -> bool {
        self.inherited(|s| s.fields_secret_by_default)
            .unwrap_or(DEFAULT_FIELDS_SECRET)
    }

    pub fn set_env_var_prefix(&self, prefix: impl Into<String>) -> &Self {
        write(&self.own).env_var_prefix = Some(prefix.into());
        self
    }

    pub fn set_runtime_setting_prefix(&self, prefix: impl Into<String>) -> &Self {
        write(&self.own).runtime_setting_prefix = Some(prefix.into());
        self
    }

    pub fn set_configuration_file(&self, path: impl Into<PathBuf>) -> &Self {
        write(&self.own).configuration_file = Some(path.into());
        self
    }

    pub fn set_description(&self, description: impl Into<String>) -> &Self {
        write(&self.own).description = Some(description.into());
        self
    }

    pub fn description(&self) -> Option<String> {
        read(&self.own).description.clone()
    }

    /// Prefix for derived environment variable names, `MY_SERVICE_` by default.
    pub fn env_var_prefix(&self) -> String {
        if let Some(prefix) = &read(&self.own).env_var_prefix {
            return prefix.clone();
        }
        naming::prefix(&self.name, &self.env_var_delimiter(), self.env_var_upcase())
    }

    /// Prefix for derived runtime setting names, `my_service.` by default.
    pub fn runtime_setting_prefix(&self) -> String {
        if let Some(prefix) = &read(&self.own).runtime_setting_prefix {
            return prefix.clone();
        }
        naming::prefix(
            &self.name,
            &self.runtime_setting_delimiter(),
            self.runtime_setting_upcase(),
        )
    }

    /// YAML file for this type.
    ///
    /// Defaults to `<root name>.yml` inside `yaml_config_path`; `None` when
    /// no file is set and there is no YAML directory.
    pub fn configuration_file(&self) -> Option<PathBuf> {
        let base = self.yaml_config_path();
        if let Some(file) = &read(&self.own).configuration_file {
            return Some(match &base {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.clone(),
            });
        }

        let base = base?;
        let root_name = naming::root_name(&self.name);
        let mut path = base;
        for part in root_name.split('/') {
            path.push(part);
        }
        path.set_extension("yml");
        Some(path)
    }

    /// Register a named predicate usable as `default_if` by fields declared afterwards.
    pub fn define_predicate(
        &self,
        name: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> &Self {
        write(&self.predicates).insert(name.into(), Arc::new(predicate));
        self
    }

    fn predicate(&self, name: &str) -> Option<DefaultPredicate> {
        self.lineage()
            .find_map(|ty| read(&ty.predicates).get(name).cloned())
    }

    /// Declare a field.
    ///
    /// Fails immediately if the name or type is invalid, or if `default_if`
    /// names a predicate that is not defined on this type or its ancestors.
    pub fn field(&self, name: &str, options: FieldOptions) -> SettingsResult<&Self> {
        if !naming::is_valid_name(name) {
            return Err(SettingsError::InvalidName(name.to_string()));
        }

        let field_type = match &options.field_type {
            Some(spec) => spec.resolve()?,
            None => FieldType::default(),
        };

        let default_if = match options.default_if {
            None => None,
            Some(DefaultIf::Predicate(predicate)) => Some(predicate),
            Some(DefaultIf::Method(method)) => Some(self.predicate(&method).ok_or_else(|| {
                SettingsError::InvalidDefaultIf {
                    type_name: self.name.clone(),
                    predicate: method,
                }
            })?),
        };

        let runtime_setting = if options.is_static {
            None
        } else {
            self.construct_runtime_setting(name, &options.runtime_setting)
        };

        // An inherited secret flag follows the declaring type's setting.
        let secret = match options.secret {
            Secret::Inherit => {
                let declaring = self.me.clone();
                Secret::When(Arc::new(move || {
                    declaring
                        .upgrade()
                        .is_none_or(|ty| ty.fields_secret_by_default())
                }))
            }
            other => other,
        };

        let mut field = Field::new(name, field_type)
            .with_description(options.description)
            .with_static(options.is_static)
            .with_secret(secret)
            .with_env_var(self.construct_env_var(name, &options.env_var))
            .with_runtime_setting(runtime_setting)
            .with_yaml_key(self.construct_yaml_key(name, &options.yaml_key));
        if let Some(default) = options.default {
            field = field.with_default(default);
        }
        if let Some(predicate) = default_if {
            field = field.with_default_if(predicate);
        }

        trace!(type_name = %self.name, field = ?field, "Declared field");

        let field = Arc::new(field);
        let mut fields = write(&self.fields);
        match fields.iter_mut().find(|f| f.name() == name) {
            Some(slot) => *slot = field,
            None => fields.push(field),
        }
        Ok(self)
    }

    fn construct_env_var(&self, name: &str, key: &SourceKey) -> Option<String> {
        match key {
            SourceKey::Disabled => None,
            SourceKey::Named(key) => Some(key.clone()),
            SourceKey::Auto if self.environment_variables_disabled() => None,
            SourceKey::Auto | SourceKey::Enabled => {
                let key = format!("{}{}", self.env_var_prefix(), name);
                Some(if self.env_var_upcase() {
                    key.to_uppercase()
                } else {
                    key
                })
            }
        }
    }

    fn construct_runtime_setting(&self, name: &str, key: &SourceKey) -> Option<String> {
        match key {
            SourceKey::Disabled => None,
            SourceKey::Named(key) => Some(key.clone()),
            SourceKey::Auto if self.runtime_settings_disabled() => None,
            SourceKey::Auto | SourceKey::Enabled => {
                let key = format!("{}{}", self.runtime_setting_prefix(), name);
                Some(if self.runtime_setting_upcase() {
                    key.to_uppercase()
                } else {
                    key
                })
            }
        }
    }

    fn construct_yaml_key(&self, name: &str, key: &SourceKey) -> Option<String> {
        match key {
            SourceKey::Disabled => None,
            SourceKey::Named(key) => Some(key.clone()),
            SourceKey::Auto if self.yaml_config_disabled() => None,
            SourceKey::Auto | SourceKey::Enabled => Some(name.to_string()),
        }
    }

    /// All fields, inherited ones first, in declaration order.
    pub fn fields(&self) -> Vec<Arc<Field>> {
        let lineage: Vec<&ConfigType> = self.lineage().collect();
        let mut out: Vec<Arc<Field>> = Vec::new();
        for ty in lineage.into_iter().rev() {
            for field in read(&ty.fields).iter() {
                match out.iter_mut().find(|f| f.name() == field.name()) {
                    Some(slot) => *slot = Arc::clone(field),
                    None => out.push(Arc::clone(field)),
                }
            }
        }
        out
    }

    /// Fields declared on this type itself.
    pub fn own_fields(&self) -> Vec<Arc<Field>> {
        read(&self.fields).clone()
    }

    /// The definition in effect for `name` on this type.
    pub fn get_field(&self, name: &str) -> Option<Arc<Field>> {
        self.lineage()
            .find_map(|ty| read(&ty.fields).iter().find(|f| f.name() == name).cloned())
    }

    pub fn includes(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }
}

impl fmt::Debug for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .finish()
    }
}
