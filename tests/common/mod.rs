//! Shared setup for integration tests.

#![allow(dead_code)]

use layered_settings::{
    ConfigType, Configuration, Context, FieldOptions, FieldType, MapEnv, MapSettings,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once. `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// An isolated context with in-memory environment and runtime settings.
pub struct Harness {
    pub env: Arc<MapEnv>,
    pub settings: Arc<MapSettings>,
    pub context: Arc<Context>,
    pub base: Arc<ConfigType>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let env = Arc::new(MapEnv::new());
        let settings = Arc::new(MapSettings::new());
        let context = Arc::new(
            Context::new()
                .with_env(env.clone())
                .with_runtime_settings(settings.clone()),
        );
        Self {
            env,
            settings,
            context,
            base: ConfigType::new_base(),
        }
    }

    /// Point every type under this harness at YAML files in `dir`.
    pub fn with_yaml_dir(self, dir: &Path, environment: &str) -> Self {
        self.base.configure(|s| {
            s.yaml_config_path = Some(dir.to_path_buf());
            s.yaml_config_env = Some(environment.to_string());
        });
        self
    }

    pub fn declare(&self, name: &str) -> Arc<ConfigType> {
        ConfigType::inherit(&self.base, name)
    }

    pub fn instance(&self, ty: &Arc<ConfigType>) -> Configuration {
        Configuration::with_context(Arc::clone(ty), Arc::clone(&self.context))
    }
}

/// The service type most tests read from.
pub fn my_service(harness: &Harness) -> Arc<ConfigType> {
    let ty = harness.declare("MyServiceConfiguration");
    ty.configure(|s| s.fields_secret_by_default = Some(false));
    ty.field("host", FieldOptions::new())
        .unwrap()
        .field(
            "port",
            FieldOptions::new().of_type(FieldType::Integer).default(80),
        )
        .unwrap()
        .field("protocol", FieldOptions::new().default("https"))
        .unwrap()
        .field(
            "timeout",
            FieldOptions::new()
                .of_type(FieldType::Float)
                .default(1.0)
                .default_if(|v| v.as_f64().is_some_and(|f| f <= 0.0)),
        )
        .unwrap()
        .field(
            "auth_token",
            FieldOptions::new()
                .env_var("MY_SERVICE_TOKEN")
                .runtime_setting(false)
                .yaml_key(false)
                .secret(true),
        )
        .unwrap();
    ty
}
