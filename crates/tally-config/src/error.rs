// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors raised while locating, parsing, and validating configuration.
//!
//! Every variant names where the bad value came from (a file, an inline
//! document, a field path, or an environment variable) so the binary can
//! print it without extra context.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file {} does not exist", path.display())]
    Missing {
        /// Requested path.
        path: PathBuf,
    },

    /// The configuration file exists but could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        /// Requested path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not map to a known format.
    #[error(
        "cannot infer config format of {}; expected .yaml, .yml, .toml or .json",
        path.display()
    )]
    UnknownFormat {
        /// Offending path.
        path: PathBuf,
    },

    /// The document is malformed or does not match the schema.
    #[error("invalid {format} config in {origin}: {message}")]
    Parse {
        /// File path, or `<inline>` for string input.
        origin: String,
        /// Format the document was parsed as.
        format: &'static str,
        /// Parser message.
        message: String,
    },

    /// A parsed value violates a constraint.
    #[error("{field}: {message}")]
    Validation {
        /// Dotted field path, e.g. `storage.retry.jitter`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `TALLY_*` override holds a value that cannot be used.
    #[error("environment variable {name}={value:?}: expected {expected}")]
    EnvOverride {
        /// Variable name.
        name: String,
        /// Raw value.
        value: String,
        /// Description of an acceptable value.
        expected: &'static str,
    },
}

impl ConfigError {
    /// Creates a missing file error.
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::Missing { path: path.into() }
    }

    /// Creates a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates an unknown format error.
    pub fn unknown_format(path: impl Into<PathBuf>) -> Self {
        Self::UnknownFormat { path: path.into() }
    }

    /// Creates a parse error.
    pub fn parse(
        origin: impl Into<String>,
        format: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Parse {
            origin: origin.into(),
            format,
            message: message.to_string(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error for a value above its ceiling.
    pub fn too_large<T: std::fmt::Display>(field: impl Into<String>, value: T, max: T) -> Self {
        Self::validation(field, format!("must be at most {}, got {}", max, value))
    }

    /// Creates an environment override error.
    pub fn env_override(
        name: impl Into<String>,
        value: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::EnvOverride {
            name: name.into(),
            value: value.into(),
            expected,
        }
    }

    /// Returns `true` if the file could not be found or read.
    pub fn is_file_error(&self) -> bool {
        matches!(self, ConfigError::Missing { .. } | ConfigError::Read { .. })
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            ConfigError::Missing { .. } => "missing",
            ConfigError::Read { .. } => "read",
            ConfigError::UnknownFormat { .. } => "unknown_format",
            ConfigError::Parse { .. } => "parse",
            ConfigError::Validation { .. } => "validation",
            ConfigError::EnvOverride { .. } => "env_override",
        }
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_message_quotes_value() {
        let error = ConfigError::env_override("TALLY_RESTORE", "maybe", "a boolean");
        assert_eq!(error.error_type(), "env_override");
        assert_eq!(
            error.to_string(),
            r#"environment variable TALLY_RESTORE="maybe": expected a boolean"#
        );
    }

    #[test]
    fn test_file_errors() {
        let denied = ConfigError::read(
            "tally.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(denied.is_file_error());
        assert!(ConfigError::missing("tally.yaml").is_file_error());
        assert!(!ConfigError::unknown_format("tally.ini").is_file_error());
    }

    #[test]
    fn test_too_large_is_validation() {
        let error = ConfigError::too_large("storage.retry.delays_ms", 90_000u64, 60_000);
        assert_eq!(error.error_type(), "validation");
        assert_eq!(
            error.to_string(),
            "storage.retry.delays_ms: must be at most 60000, got 90000"
        );
    }

    #[test]
    fn test_parse_names_origin_and_format() {
        let error = ConfigError::parse("/etc/tally.toml", "toml", "expected `=`");
        assert_eq!(
            error.to_string(),
            "invalid toml config in /etc/tally.toml: expected `=`"
        );
    }
}
