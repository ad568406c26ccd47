// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for tally.
//!
//! # Schema Structure
//!
//! ```text
//! TallyConfig
//! ├── storage: StorageConfig
//! │   ├── backend: BackendConfig (file | sqlite | memory)
//! │   └── retry: RetryConfig (fixed | exponential | none)
//! └── logging: LoggingConfig
//! ```

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tally_core::{RetryConfig, MAX_SCHEDULE_LEN};
use tally_store::{CoordinatorConfig, RestoreFailurePolicy, SqliteConfig};

// =============================================================================
// Constants
// =============================================================================

/// Default store interval in seconds.
pub const DEFAULT_STORE_INTERVAL_SECS: u64 = 300;

/// Longest store interval accepted, in seconds (30 days).
pub const MAX_STORE_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Default flush timeout in milliseconds.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 10_000;

/// Default snapshot file location.
pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1_000;

/// Longest single retry delay accepted, in milliseconds.
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure for tally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    /// Persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TallyConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Persistence settings: flush scheduling, restore behavior, and backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Seconds between flushes. Zero selects debounced mode.
    #[serde(default = "default_store_interval_secs")]
    pub store_interval_secs: u64,

    /// Load the last snapshot on startup.
    #[serde(default = "default_enabled")]
    pub restore: bool,

    /// What to do when a stored snapshot exists but cannot be loaded.
    #[serde(default)]
    pub restore_failure: RestoreFailurePolicy,

    /// Upper bound on a single flush, in milliseconds.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Durable backend selection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Retry policy for transient backend failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_store_interval_secs() -> u64 {
    DEFAULT_STORE_INTERVAL_SECS
}

fn default_flush_timeout_ms() -> u64 {
    DEFAULT_FLUSH_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

impl StorageConfig {
    /// Returns the store interval as a Duration.
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    /// Returns the flush timeout as a Duration.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Returns `true` when every mutation schedules a flush.
    pub fn is_debounced(&self) -> bool {
        self.store_interval_secs == 0
    }

    /// Builds the coordinator configuration for these settings.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::builder()
            .store_interval(self.store_interval())
            .restore(self.restore)
            .restore_failure(self.restore_failure)
            .flush_timeout(self.flush_timeout())
            .build()
    }

    /// Returns the SQLite settings when the sqlite backend is selected.
    pub fn sqlite_config(&self) -> Option<SqliteConfig> {
        match &self.backend {
            BackendConfig::Sqlite {
                dsn,
                busy_timeout_ms,
            } => Some(
                SqliteConfig::new(dsn.clone())
                    .with_busy_timeout(Duration::from_millis(*busy_timeout_ms))
                    .with_retry(self.retry.clone()),
            ),
            _ => None,
        }
    }

    /// Validates the storage configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.store_interval_secs > MAX_STORE_INTERVAL_SECS {
            return Err(ConfigError::too_large(
                "storage.store_interval_secs",
                self.store_interval_secs,
                MAX_STORE_INTERVAL_SECS,
            ));
        }

        if self.flush_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "storage.flush_timeout_ms",
                "must be greater than 0",
            ));
        }

        self.backend.validate()?;
        validate_retry(&self.retry)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_interval_secs: DEFAULT_STORE_INTERVAL_SECS,
            restore: true,
            restore_failure: RestoreFailurePolicy::default(),
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn validate_retry(retry: &RetryConfig) -> ConfigResult<()> {
    let check_delay = |field: &str, delay: &Duration| -> ConfigResult<()> {
        let millis = delay.as_millis() as u64;
        if millis > MAX_RETRY_DELAY_MS {
            return Err(ConfigError::too_large(field, millis, MAX_RETRY_DELAY_MS));
        }
        Ok(())
    };

    match retry {
        RetryConfig::Fixed { delays } => {
            if delays.len() > MAX_SCHEDULE_LEN {
                return Err(ConfigError::validation(
                    "storage.retry.delays_ms",
                    format!("at most {} entries allowed, got {}", MAX_SCHEDULE_LEN, delays.len()),
                ));
            }
            for delay in delays {
                check_delay("storage.retry.delays_ms", delay)?;
            }
        }
        RetryConfig::Exponential {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
            jitter,
        } => {
            if *max_retries as usize > MAX_SCHEDULE_LEN {
                return Err(ConfigError::too_large(
                    "storage.retry.max_retries",
                    *max_retries as usize,
                    MAX_SCHEDULE_LEN,
                ));
            }
            check_delay("storage.retry.initial_delay_ms", initial_delay)?;
            check_delay("storage.retry.max_delay_ms", max_delay)?;
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(ConfigError::validation(
                    "storage.retry.multiplier",
                    "must be a finite number >= 1.0",
                ));
            }
            if !(0.0..=1.0).contains(jitter) {
                return Err(ConfigError::validation(
                    "storage.retry.jitter",
                    format!("must be within 0.0..=1.0, got {}", jitter),
                ));
            }
        }
        RetryConfig::None => {}
    }
    Ok(())
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Durable backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum BackendConfig {
    /// Single JSON snapshot file.
    File {
        /// Target file path.
        #[serde(default = "default_file_path")]
        path: PathBuf,
    },

    /// SQLite database with `gauges` and `counters` tables.
    Sqlite {
        /// Database path or `:memory:`.
        dsn: String,
        /// Busy timeout in milliseconds.
        #[serde(default = "default_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },

    /// Process-local storage, lost on exit.
    Memory,
}

fn default_file_path() -> PathBuf {
    PathBuf::from(DEFAULT_FILE_STORAGE_PATH)
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl BackendConfig {
    /// Returns the backend kind as it appears in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::File { .. } => "file",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Memory => "memory",
        }
    }

    /// Validates the backend configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            BackendConfig::File { path } if path.as_os_str().is_empty() => Err(
                ConfigError::validation("storage.backend.path", "cannot be empty"),
            ),
            BackendConfig::Sqlite { dsn, .. } if dsn.trim().is_empty() => Err(
                ConfigError::validation("storage.backend.dsn", "cannot be empty"),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File {
            path: default_file_path(),
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include span targets in logs.
    #[serde(default = "default_enabled")]
    pub with_target: bool,
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Newline-delimited JSON.
    Json,
    /// Single-line compact text.
    Compact,
}

impl LogFormat {
    /// Returns the format name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::FlushMode;

    #[test]
    fn test_default_config() {
        let config = TallyConfig::default();
        assert_eq!(config.storage.store_interval_secs, 300);
        assert!(config.storage.restore);
        assert_eq!(
            config.storage.backend,
            BackendConfig::File {
                path: PathBuf::from("/tmp/metrics-db.json")
            }
        );
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordinator_config_conversion() {
        let mut storage = StorageConfig::default();
        storage.store_interval_secs = 0;
        storage.restore = false;
        storage.restore_failure = RestoreFailurePolicy::Abort;
        storage.flush_timeout_ms = 2500;

        let config = storage.coordinator_config();
        assert_eq!(config.flush_mode(), FlushMode::Debounced);
        assert!(!config.restore);
        assert_eq!(config.restore_failure, RestoreFailurePolicy::Abort);
        assert_eq!(config.flush_timeout, Duration::from_millis(2500));
        assert!(storage.is_debounced());
    }

    #[test]
    fn test_sqlite_config_conversion() {
        let mut storage = StorageConfig::default();
        assert!(storage.sqlite_config().is_none());

        storage.backend = BackendConfig::Sqlite {
            dsn: "metrics.db".to_string(),
            busy_timeout_ms: 250,
        };
        storage.retry = RetryConfig::None;

        let sqlite = storage.sqlite_config().unwrap();
        assert_eq!(sqlite.dsn, "metrics.db");
        assert_eq!(sqlite.busy_timeout, Duration::from_millis(250));
        assert_eq!(sqlite.retry, RetryConfig::None);
    }

    #[test]
    fn test_empty_path_rejected() {
        let mut config = TallyConfig::default();
        config.storage.backend = BackendConfig::File {
            path: PathBuf::new(),
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "storage.backend.path"));
    }

    #[test]
    fn test_empty_dsn_rejected() {
        let mut config = TallyConfig::default();
        config.storage.backend = BackendConfig::Sqlite {
            dsn: "  ".to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_flush_timeout_rejected() {
        let mut config = TallyConfig::default();
        config.storage.flush_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_interval_limit() {
        let mut config = TallyConfig::default();
        config.storage.store_interval_secs = MAX_STORE_INTERVAL_SECS;
        assert!(config.validate().is_ok());

        config.storage.store_interval_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_type(), "validation");
        assert!(err.to_string().starts_with("storage.store_interval_secs: must be at most"));
    }

    #[test]
    fn test_retry_schedule_limits() {
        let mut config = TallyConfig::default();
        config.storage.retry = RetryConfig::Fixed {
            delays: vec![Duration::from_millis(10); MAX_SCHEDULE_LEN + 1],
        };
        assert!(config.validate().is_err());

        config.storage.retry = RetryConfig::Fixed {
            delays: vec![Duration::from_secs(61)],
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "storage.retry.delays_ms: must be at most 60000, got 61000"
        );

        config.storage.retry = RetryConfig::Fixed {
            delays: vec![Duration::from_secs(60); MAX_SCHEDULE_LEN],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_exponential_retry_validation() {
        let mut config = TallyConfig::default();
        config.storage.retry = RetryConfig::Exponential {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 0.5,
            jitter: 0.0,
        };
        assert!(config.validate().is_err());

        config.storage.retry = RetryConfig::Exponential {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_kind() {
        assert_eq!(BackendConfig::default().kind(), "file");
        assert_eq!(BackendConfig::Memory.kind(), "memory");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"storage": {"store_interval": 10}}"#;
        assert!(serde_json::from_str::<TallyConfig>(json).is_err());
    }

    #[test]
    fn test_partial_storage_uses_defaults() {
        let json = r#"{"storage": {"store_interval_secs": 0, "backend": {"kind": "memory"}}}"#;
        let config: TallyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.storage.store_interval_secs, 0);
        assert!(config.storage.restore);
        assert_eq!(config.storage.backend, BackendConfig::Memory);
        assert_eq!(config.storage.retry, RetryConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
