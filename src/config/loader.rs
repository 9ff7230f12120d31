//! YAML configuration file loading.
//!
//! Files are keyed by deployment environment, with a reserved `shared`
//! section that every environment inherits:
//!
//! ```yaml
//! shared:
//!   foo: bar
//!   bar: baz
//!
//! development:
//!   bar: qux
//!   nested:
//!     key: value
//! ```
//!
//! For `development` this loads as `{"foo": "bar", "bar": "qux",
//! "nested.key": "value"}`: both sections are flattened to dotted keys and
//! the environment section wins on conflict.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Flattened `dotted.key -> value` view of a YAML file for one environment.
pub type YamlMap = HashMap<String, Value>;

/// Name of the section merged into every environment.
pub const SHARED_SECTION: &str = "shared";

/// Hook that rewrites file contents before they are parsed as YAML,
/// e.g. to expand template directives.
#[derive(Clone)]
pub struct Preprocessor(Arc<dyn Fn(&str) -> Result<String> + Send + Sync>);

impl Preprocessor {
    pub fn new(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, text: &str) -> Result<String> {
        (self.0)(text)
    }
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preprocessor(<fn>)")
    }
}

/// Loader for per-environment YAML configuration files.
#[derive(Debug, Clone, Default)]
pub struct YamlLoader {
    preprocessor: Option<Preprocessor>,
}

impl YamlLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Load the file at `path` for `environment`.
    ///
    /// Returns `None` when there is no file, which callers treat as the
    /// YAML source being unavailable. Unreadable, unparseable, or
    /// non-mapping documents degrade to an empty map.
    pub fn load(&self, path: &Path, environment: &str) -> Option<YamlMap> {
        if !path.is_file() {
            debug!(path = %path.display(), "No YAML configuration file");
            return None;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read YAML configuration");
                return Some(YamlMap::new());
            }
        };

        let content = match &self.preprocessor {
            Some(preprocessor) => match preprocessor.apply(&content) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to preprocess YAML configuration");
                    return Some(YamlMap::new());
                }
            },
            None => content,
        };

        let config = self.parse(&content, environment);
        debug!(path = %path.display(), environment, keys = config.len(), "Loaded YAML configuration");
        Some(config)
    }

    /// Parse YAML text and select the section for `environment`.
    pub fn parse(&self, content: &str, environment: &str) -> YamlMap {
        match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(serde_yaml::Value::Mapping(document)) => environment_config(&document, environment),
            Ok(serde_yaml::Value::Null) => YamlMap::new(),
            Ok(_) => {
                warn!("YAML configuration is not a mapping, ignoring it");
                YamlMap::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse YAML configuration");
                YamlMap::new()
            }
        }
    }
}

fn environment_config(document: &serde_yaml::Mapping, environment: &str) -> YamlMap {
    let mut config = YamlMap::new();
    for section in [SHARED_SECTION, environment] {
        if let Some(serde_yaml::Value::Mapping(map)) = document.get(section) {
            flatten_into(&mut config, map, None);
        }
    }
    config
}

/// Flatten nested mappings into `prefix.key` entries. Later entries win.
pub fn flatten_into(out: &mut YamlMap, map: &serde_yaml::Mapping, prefix: Option<&str>) {
    for (key, value) in map {
        let key = key_to_string(key);
        let key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };

        match value {
            serde_yaml::Value::Mapping(nested) => flatten_into(out, nested, Some(&key)),
            other => {
                out.insert(key, yaml_to_json(other));
            }
        }
    }
}

fn key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn yaml_to_json(value: &serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::Array(items.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (key_to_string(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}
