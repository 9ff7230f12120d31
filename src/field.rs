//! Field definitions and the three-source lookup.
//!
//! A [`Field`] is immutable once built. Its lookup keys are fixed at
//! declaration time; only the data behind the sources changes between calls.

use crate::coerce::{self, FieldType, Value};
use crate::config::YamlMap;
use crate::error::SettingsResult;
use crate::runtime::RuntimeSettings;
use crate::sources::{EnvSource, Source};
use serde_json::Value as RawValue;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Predicate deciding whether a resolved value should be replaced by the default.
pub type DefaultPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Predicate deciding at read time whether a field is secret.
pub type SecretPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// How a field is marked as secret.
#[derive(Clone, Default)]
pub enum Secret {
    /// Use the configuration type's `fields_secret_by_default` setting.
    #[default]
    Inherit,
    Fixed(bool),
    When(SecretPredicate),
}

impl From<bool> for Secret {
    fn from(value: bool) -> Self {
        Secret::Fixed(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Inherit => write!(f, "Inherit"),
            Secret::Fixed(b) => write!(f, "Fixed({})", b),
            Secret::When(_) => write!(f, "When(<fn>)"),
        }
    }
}

/// The sources consulted for one resolution. A missing source is skipped.
#[derive(Clone, Copy, Default)]
pub struct Sources<'a> {
    pub env: Option<&'a dyn EnvSource>,
    pub runtime: Option<&'a dyn RuntimeSettings>,
    pub yaml: Option<&'a YamlMap>,
}

impl<'a> Sources<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, env: &'a dyn EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_runtime(mut self, runtime: &'a dyn RuntimeSettings) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_yaml(mut self, yaml: &'a YamlMap) -> Self {
        self.yaml = Some(yaml);
        self
    }
}

/// A resolved value and the source that supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Option<Value>,
    pub source: Source,
}

/// Definition of a single setting.
#[derive(Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    description: Option<String>,
    default: Option<Value>,
    default_if: Option<DefaultPredicate>,
    env_var: Option<String>,
    runtime_setting: Option<String>,
    yaml_key: Option<String>,
    is_static: bool,
    secret: Secret,
}

impl Field {
    /// Create a field with no lookup keys. Keys are added with the `with_*`
    /// methods; configuration types derive them from naming conventions.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
            default: None,
            default_if: None,
            env_var: None,
            runtime_setting: None,
            yaml_key: None,
            is_static: false,
            secret: Secret::Inherit,
        }
    }

    /// Set the default from a raw value. It is coerced to the field type once, here.
    pub fn with_default(mut self, raw: impl Into<RawValue>) -> Self {
        self.default = coerce::coerce(&raw.into(), self.field_type);
        self
    }

    pub fn with_default_if(mut self, predicate: DefaultPredicate) -> Self {
        self.default_if = Some(predicate);
        self
    }

    pub fn with_env_var(mut self, key: Option<String>) -> Self {
        self.env_var = key;
        self
    }

    /// Static fields never read runtime settings, so the key is dropped for them.
    pub fn with_runtime_setting(mut self, key: Option<String>) -> Self {
        self.runtime_setting = if self.is_static { None } else { key };
        self
    }

    pub fn with_yaml_key(mut self, key: Option<String>) -> Self {
        self.yaml_key = key;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        if is_static {
            self.runtime_setting = None;
        }
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn has_default_if(&self) -> bool {
        self.default_if.is_some()
    }

    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    pub fn runtime_setting(&self) -> Option<&str> {
        self.runtime_setting.as_deref()
    }

    pub fn yaml_key(&self) -> Option<&str> {
        self.yaml_key.as_deref()
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Whether the value should be hidden in snapshots and audit output.
    pub fn is_secret(&self, secret_by_default: bool) -> bool {
        match &self.secret {
            Secret::Inherit => secret_by_default,
            Secret::Fixed(b) => *b,
            Secret::When(predicate) => predicate(),
        }
    }

    /// Coerce a raw value to this field's type.
    pub fn coerce(&self, raw: &RawValue) -> Option<Value> {
        coerce::coerce(raw, self.field_type)
    }

    /// True if the default should replace this resolved value.
    pub fn uses_default(&self, value: &Value) -> bool {
        self.default_if.as_ref().is_some_and(|predicate| predicate(value))
    }

    /// Resolve the value: env, then runtime settings, then YAML, then default.
    pub fn resolve(&self, sources: &Sources<'_>) -> SettingsResult<Resolved> {
        let resolved = match self.fetch(sources)? {
            Some((raw, source)) => match self.coerce(&raw) {
                Some(value) if !self.uses_default(&value) => Resolved {
                    value: Some(value),
                    source,
                },
                _ => self.default_resolution(),
            },
            None => self.default_resolution(),
        };
        trace!(field = %self.name, source = %resolved.source, "Resolved field");
        Ok(resolved)
    }

    /// Resolved value only.
    pub fn value(&self, sources: &Sources<'_>) -> SettingsResult<Option<Value>> {
        Ok(self.resolve(sources)?.value)
    }

    /// Source that supplies the current value.
    pub fn source(&self, sources: &Sources<'_>) -> SettingsResult<Source> {
        Ok(self.resolve(sources)?.source)
    }

    /// First non-blank raw value across the sources, in priority order.
    pub fn fetch(&self, sources: &Sources<'_>) -> SettingsResult<Option<(RawValue, Source)>> {
        if let (Some(env), Some(key)) = (sources.env, self.env_var.as_deref())
            && let Some(raw) = env.var(key)
            && !raw.is_empty()
        {
            return Ok(Some((RawValue::String(raw), Source::Env)));
        }

        if let (Some(runtime), Some(key)) = (sources.runtime, self.runtime_setting.as_deref())
            && let Some(raw) = runtime.get(key)?
            && coerce::is_present(&raw)
        {
            return Ok(Some((raw, Source::Runtime)));
        }

        if let (Some(yaml), Some(key)) = (sources.yaml, self.yaml_key.as_deref())
            && let Some(raw) = yaml.get(key)
            && coerce::is_present(raw)
        {
            return Ok(Some((raw.clone(), Source::Yaml)));
        }

        Ok(None)
    }

    fn default_resolution(&self) -> Resolved {
        Resolved {
            value: self.default.clone(),
            source: Source::Default,
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("default", &self.default)
            .field("default_if", &self.default_if.is_some())
            .field("env_var", &self.env_var)
            .field("runtime_setting", &self.runtime_setting)
            .field("yaml_key", &self.yaml_key)
            .field("is_static", &self.is_static)
            .field("secret", &self.secret)
            .finish()
    }
}
