//! Layered application settings.
//!
//! Settings are declared as typed fields on configuration types and
//! resolved on every read from, in order: environment variables, a
//! pluggable runtime settings backend, per-environment YAML files, and the
//! field default. Lookup keys follow naming conventions derived from the
//! type name and can be overridden per type or per field.
//!
//! ```
//! use layered_settings::{ConfigType, Configuration, Context, FieldOptions, FieldType, MapEnv};
//! use std::sync::Arc;
//!
//! let ty = ConfigType::inherit(&ConfigType::new_base(), "MyServiceConfiguration");
//! ty.field("port", FieldOptions::new().of_type(FieldType::Integer).default(80))
//!     .unwrap();
//!
//! let env = Arc::new(MapEnv::new().with_var("MY_SERVICE_PORT", "8080"));
//! let config = Configuration::with_context(ty, Arc::new(Context::new().with_env(env)));
//! assert_eq!(config.get_as::<i64>("port").unwrap(), Some(8080));
//! ```

pub mod accessors;
pub mod coerce;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod registry;
pub mod runtime;
pub mod sources;

pub use coerce::{FieldType, FromValue, Value};
pub use config::{
    ClassSettings, ConfigType, Configuration, FieldOptions, Preprocessor, SourceKey, YamlLoader,
    YamlMap,
};
pub use context::{Context, InitState};
pub use error::{ErrorCode, SettingsError, SettingsResult};
pub use field::{Field, Resolved, Secret, Sources};
pub use registry::{OverrideValues, Registry};
pub use runtime::{MapSettings, RuntimeSettings, UninitializedRuntimeSettings};
pub use sources::{EnvSource, MapEnv, ProcessEnv, Source};
