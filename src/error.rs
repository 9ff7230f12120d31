//! Structured error types for settings definition and resolution.

use serde::Serialize;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Definition errors
    InvalidName,
    InvalidType,
    InvalidDefaultIf,

    // Lookup errors
    UnknownField,
    UnknownConfiguration,
    UnknownConfigurationType,
    InvalidConfigurationName,

    // Resolution errors
    NotInitialized,
    RuntimeSettingsUninitialized,
    RuntimeSettings,
}

/// Errors raised while declaring or reading settings.
///
/// Definition errors (`InvalidName`, `InvalidType`, `InvalidDefaultIf`) are
/// programmer errors and surface when a field is declared. Resolution never
/// fails because a source is missing; the only resolution-time failures are
/// the initialization guard and runtime-settings backend errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid type: {0:?}")]
    InvalidType(String),

    #[error("default_if predicate {predicate:?} is not defined for {type_name}")]
    InvalidDefaultIf { type_name: String, predicate: String },

    #[error("Unknown field: {0:?}")]
    UnknownField(String),

    #[error("Unknown configuration: {0:?}")]
    UnknownConfiguration(String),

    #[error("Configuration type {0} is not defined")]
    UnknownConfigurationType(String),

    #[error("Invalid configuration name: {0:?}")]
    InvalidConfigurationName(String),

    #[error("The value for {type_name}.{field} cannot be referenced during initialization")]
    NotInitialized { type_name: String, field: String },

    #[error("Attempt to call runtime setting {0} during initialization")]
    RuntimeSettingsUninitialized(String),

    #[error("Runtime setting {key} could not be read: {message}")]
    RuntimeSettings { key: String, message: String },
}

impl SettingsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SettingsError::InvalidName(_) => ErrorCode::InvalidName,
            SettingsError::InvalidType(_) => ErrorCode::InvalidType,
            SettingsError::InvalidDefaultIf { .. } => ErrorCode::InvalidDefaultIf,
            SettingsError::UnknownField(_) => ErrorCode::UnknownField,
            SettingsError::UnknownConfiguration(_) => ErrorCode::UnknownConfiguration,
            SettingsError::UnknownConfigurationType(_) => ErrorCode::UnknownConfigurationType,
            SettingsError::InvalidConfigurationName(_) => ErrorCode::InvalidConfigurationName,
            SettingsError::NotInitialized { .. } => ErrorCode::NotInitialized,
            SettingsError::RuntimeSettingsUninitialized(_) => {
                ErrorCode::RuntimeSettingsUninitialized
            }
            SettingsError::RuntimeSettings { .. } => ErrorCode::RuntimeSettings,
        }
    }

    /// True for errors that indicate a broken configuration type definition.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::InvalidName | ErrorCode::InvalidType | ErrorCode::InvalidDefaultIf
        )
    }

    pub fn runtime_settings(key: &str, err: impl std::fmt::Display) -> Self {
        SettingsError::RuntimeSettings {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for settings operations.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;
