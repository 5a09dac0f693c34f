//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration directory does not exist
    #[error("Configuration directory not found: {path:?}")]
    DirectoryNotFound { path: PathBuf },

    /// Invalid TOML syntax in configuration file
    #[error("Invalid TOML syntax in '{file_path}': {error}")]
    InvalidToml { file_path: String, error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Environment override could not be applied
    #[error("Environment override error for key {key}: {reason}")]
    EnvironmentOverrideError { key: String, reason: String },

    /// Merged sources did not deserialize into the configuration shape
    #[error("Failed to merge configuration sources: {error}")]
    ConfigMergeError { error: String },
}

impl ConfigurationError {
    pub fn invalid_toml<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::InvalidToml {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: ToString, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn environment_override<K: Into<String>, R: std::fmt::Display>(key: K, reason: R) -> Self {
        Self::EnvironmentOverrideError {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn merge_error<E: std::fmt::Display>(error: E) -> Self {
        Self::ConfigMergeError {
            error: error.to_string(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
