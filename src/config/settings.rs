//! Class-level settings of configuration types.
//!
//! Every attribute is optional on a given type. Reads walk up the parent
//! chain to the nearest type that set the attribute, then fall back to the
//! defaults below. Setting an attribute on the root type changes it for
//! every type that does not set it itself.

use std::path::PathBuf;

pub const DEFAULT_ENV_VAR_DELIMITER: &str = "_";
pub const DEFAULT_RUNTIME_SETTING_DELIMITER: &str = ".";
pub const DEFAULT_ENV_VAR_UPCASE: bool = true;
pub const DEFAULT_RUNTIME_SETTING_UPCASE: bool = false;
pub const DEFAULT_YAML_CONFIG_ENV: &str = "development";
pub const DEFAULT_FIELDS_SECRET: bool = true;

/// Attributes inherited through the type chain.
#[derive(Debug, Clone, Default)]
pub struct ClassSettings {
    pub environment_variables_disabled: Option<bool>,
    pub runtime_settings_disabled: Option<bool>,
    pub yaml_config_disabled: Option<bool>,
    pub env_var_delimiter: Option<String>,
    pub runtime_setting_delimiter: Option<String>,
    pub env_var_upcase: Option<bool>,
    pub runtime_setting_upcase: Option<bool>,
    /// Directory YAML files are loaded from.
    pub yaml_config_path: Option<PathBuf>,
    /// Deployment environment section read from YAML files.
    pub yaml_config_env: Option<String>,
    pub fields_secret_by_default: Option<bool>,
}

/// Attributes that belong to one type only and are never inherited.
#[derive(Debug, Clone, Default)]
pub struct OwnSettings {
    pub env_var_prefix: Option<String>,
    pub runtime_setting_prefix: Option<String>,
    /// YAML file, relative to `yaml_config_path` unless absolute.
    pub configuration_file: Option<PathBuf>,
    pub description: Option<String>,
}
