//! Configuration types and instances.
//!
//! A [`ConfigType`] declares fields and naming settings; a
//! [`Configuration`] resolves them against the sources in a
//! [`Context`](crate::Context):
//!
//! 1. **Environment** - `MY_SERVICE_HOST` by default
//! 2. **Runtime settings** - `my_service.host` by default, skipped for static fields
//! 3. **YAML** - `host` in `<yaml_config_path>/my_service.yml`
//! 4. **Default** - declared with the field
//!
//! The first non-blank value wins. Each source can be disabled per type or
//! globally on [`ConfigType::root`], and each key can be set explicitly per
//! field.

mod definition;
mod instance;
mod loader;
pub mod naming;
mod settings;

pub use definition::{ConfigType, DefaultIf, FieldOptions, SourceKey, TypeSpec};
pub use instance::{Configuration, SECURE_HASH_PREFIX, secure_hash};
pub use loader::{Preprocessor, SHARED_SECTION, YamlLoader, YamlMap, flatten_into};
pub use settings::*;
