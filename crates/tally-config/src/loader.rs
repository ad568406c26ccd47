// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for tally.
//!
//! # Loading Pipeline
//!
//! 1. Read the file (YAML, TOML, or JSON by extension)
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse into [`TallyConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! TALLY_STORE_INTERVAL=0                  # seconds, 0 = debounced
//! TALLY_RESTORE=false
//! TALLY_FILE_STORAGE_PATH=/var/lib/tally/metrics.json
//! TALLY_DATABASE_DSN=/var/lib/tally/metrics.db
//! TALLY_LOG_LEVEL=debug
//! ```
//!
//! `TALLY_DATABASE_DSN` wins over `TALLY_FILE_STORAGE_PATH` when both are set.

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{BackendConfig, LogLevel, TallyConfig, DEFAULT_BUSY_TIMEOUT_MS};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "TALLY";

/// Origin reported in parse errors for string input.
const INLINE_ORIGIN: &str = "<inline>";

// =============================================================================
// EnvSource
// =============================================================================

/// Where environment lookups are answered from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The process environment.
    #[default]
    Process,
    /// A fixed set of variables.
    Map(HashMap<String, String>),
}

impl EnvSource {
    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<String> {
        match self {
            EnvSource::Process => env::var(name).ok(),
            EnvSource::Map(vars) => vars.get(name).cloned(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        EnvSource::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for tally.
///
/// # Examples
///
/// ```no_run
/// use tally_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("tally.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve placeholders and apply overrides.
    resolve_env_vars: bool,

    /// Source for environment lookups.
    env: EnvSource,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
            env: EnvSource::Process,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable processing.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Replaces the environment lookup source.
    pub fn with_env_source(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Loads configuration from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<TallyConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        debug!(
            backend = config.storage.backend.kind(),
            store_interval_secs = config.storage.store_interval_secs,
            restore = config.storage.restore,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Loads configuration from a file, falling back to defaults when the
    /// file does not exist. Environment overrides apply either way.
    pub fn load_or_default(&self, path: impl AsRef<Path>) -> ConfigResult<TallyConfig> {
        let path = path.as_ref();
        if path.exists() {
            return self.load(path);
        }

        info!(
            "Configuration file {} not found, using defaults",
            path.display()
        );
        self.load_defaults()
    }

    /// Builds the default configuration with environment overrides applied.
    pub fn load_defaults(&self) -> ConfigResult<TallyConfig> {
        let mut config = TallyConfig::default();
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<TallyConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config = parse_str(&content, format, INLINE_ORIGIN)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::missing(path));
        }

        fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<TallyConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format, &path.display().to_string())
    }

    /// Expands `${NAME}` and `${NAME:default}` placeholders.
    ///
    /// A placeholder whose variable is unset and has no default is left in
    /// place, as is an unterminated `${`.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(open) = rest.find("${") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };

            let body = &after[..close];
            let (name, default) = match body.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };
            match self.env.get(name) {
                Some(value) => out.push_str(&value),
                None => match default {
                    Some(default) => out.push_str(default),
                    None => {
                        warn!(variable = name, "Unset variable in config placeholder");
                        out.push_str(&rest[open..open + 3 + close]);
                    }
                },
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }

    fn var(&self, suffix: &str) -> (String, Option<String>) {
        let name = format!("{}_{}", self.env_prefix, suffix);
        let value = self.env.get(&name);
        (name, value)
    }

    fn apply_env_overrides(&self, config: &mut TallyConfig) -> ConfigResult<()> {
        let storage = &mut config.storage;

        if let (name, Some(value)) = self.var("STORE_INTERVAL") {
            storage.store_interval_secs = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::env_override(name, value, "whole seconds, 0 or more"))?;
        }

        if let (name, Some(value)) = self.var("RESTORE") {
            storage.restore = parse_bool(&value)
                .ok_or_else(|| ConfigError::env_override(name, value, "a boolean"))?;
        }

        if let (_, Some(path)) = self.var("FILE_STORAGE_PATH") {
            storage.backend = BackendConfig::File {
                path: PathBuf::from(path),
            };
        }

        if let (_, Some(dsn)) = self.var("DATABASE_DSN") {
            let busy_timeout_ms = match &storage.backend {
                BackendConfig::Sqlite {
                    busy_timeout_ms, ..
                } => *busy_timeout_ms,
                _ => DEFAULT_BUSY_TIMEOUT_MS,
            };
            storage.backend = BackendConfig::Sqlite {
                dsn,
                busy_timeout_ms,
            };
        }

        if let (name, Some(value)) = self.var("LOG_LEVEL") {
            config.logging.level = parse_log_level(&value).ok_or_else(|| {
                ConfigError::env_override(name, value, "one of trace, debug, info, warn, error")
            })?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::unknown_format(path)),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str(content: &str, format: ConfigFormat, origin: &str) -> ConfigResult<TallyConfig> {
    let parsed: Result<TallyConfig, String> = match format {
        ConfigFormat::Yaml => parse_yaml(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::parse(origin, format.extension(), message))
}

fn parse_yaml<T: DeserializeOwned>(content: &str) -> Result<T, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Some(true),
        "false" | "0" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<TallyConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<TallyConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================
