//! Process collaborators shared by configuration instances.
//!
//! A [`Context`] bundles everything outside the configuration types that
//! resolution depends on: the environment accessor, the swappable runtime
//! settings backend, the application initialization guard, and the YAML
//! loader. [`Context::global`] is used by default; tests build their own.

use crate::config::YamlLoader;
use crate::error::{SettingsError, SettingsResult};
use crate::runtime::RuntimeSettings;
use crate::sources::{EnvSource, ProcessEnv};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::info;

static GLOBAL: LazyLock<Arc<Context>> = LazyLock::new(|| Arc::new(Context::new()));

/// Shared handle to a runtime settings backend.
pub type RuntimeBackend = Arc<Box<dyn RuntimeSettings>>;

/// Host application lifecycle as seen by the initialization guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// No guard: every field can be read at any time (default).
    Untracked = 0,
    /// The application is starting; only static fields can be read.
    Initializing = 1,
    /// Startup finished.
    Initialized = 2,
}

impl InitState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => InitState::Initializing,
            2 => InitState::Initialized,
            _ => InitState::Untracked,
        }
    }
}

pub struct Context {
    env: Arc<dyn EnvSource>,
    runtime: ArcSwapOption<Box<dyn RuntimeSettings>>,
    init_state: AtomicU8,
    runtime_settings_secure: AtomicBool,
    yaml_loader: YamlLoader,
}

impl Context {
    /// Context reading the process environment, with no runtime settings backend.
    pub fn new() -> Self {
        Self {
            env: Arc::new(ProcessEnv),
            runtime: ArcSwapOption::empty(),
            init_state: AtomicU8::new(InitState::Untracked as u8),
            runtime_settings_secure: AtomicBool::new(true),
            yaml_loader: YamlLoader::new(),
        }
    }

    /// The process-wide default context.
    pub fn global() -> Arc<Context> {
        Arc::clone(&GLOBAL)
    }

    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn with_runtime_settings(self, settings: impl RuntimeSettings + 'static) -> Self {
        self.set_runtime_settings(settings);
        self
    }

    pub fn with_yaml_loader(mut self, loader: YamlLoader) -> Self {
        self.yaml_loader = loader;
        self
    }

    pub fn env(&self) -> &dyn EnvSource {
        self.env.as_ref()
    }

    pub fn yaml_loader(&self) -> &YamlLoader {
        &self.yaml_loader
    }

    /// Install or replace the runtime settings backend.
    pub fn set_runtime_settings(&self, settings: impl RuntimeSettings + 'static) {
        let backend: Box<dyn RuntimeSettings> = Box::new(settings);
        self.runtime.store(Some(Arc::new(backend)));
    }

    pub fn clear_runtime_settings(&self) {
        self.runtime.store(None);
    }

    /// Current runtime settings backend, if any.
    pub fn runtime_settings(&self) -> Option<RuntimeBackend> {
        self.runtime.load_full()
    }

    /// Whether runtime settings may serve secret fields (default true).
    pub fn runtime_settings_secure(&self) -> bool {
        self.runtime_settings_secure.load(Ordering::Relaxed)
    }

    pub fn set_runtime_settings_secure(&self, secure: bool) {
        self.runtime_settings_secure.store(secure, Ordering::Relaxed);
    }

    pub fn init_state(&self) -> InitState {
        InitState::from_u8(self.init_state.load(Ordering::Acquire))
    }

    /// Mark the application as starting. Non-static fields fail until
    /// [`finish_initialization`](Self::finish_initialization) is called.
    pub fn begin_initialization(&self) {
        self.init_state
            .store(InitState::Initializing as u8, Ordering::Release);
    }

    pub fn finish_initialization(&self) {
        self.init_state
            .store(InitState::Initialized as u8, Ordering::Release);
        info!("Application initialized, all settings are readable");
    }

    /// Fails if the application is still initializing.
    pub fn ensure_initialized(&self, type_name: &str, field: &str) -> SettingsResult<()> {
        if self.init_state() == InitState::Initializing {
            return Err(SettingsError::NotInitialized {
                type_name: type_name.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("runtime_settings", &self.runtime.load().is_some())
            .field("init_state", &self.init_state())
            .field("runtime_settings_secure", &self.runtime_settings_secure())
            .finish()
    }
}
