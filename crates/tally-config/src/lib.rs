// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tally-config
//!
//! Configuration schema, loading, and validation for tally.
//!
//! ## Example Configuration
//!
//! ```yaml
//! storage:
//!   store_interval_secs: 300
//!   restore: true
//!   backend:
//!     kind: file
//!     path: /tmp/metrics-db.json
//!   retry:
//!     kind: fixed
//!     delays_ms: [1000, 3000, 5000]
//! logging:
//!   level: info
//!   format: text
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, EnvSource};
pub use schema::{
    BackendConfig, LogFormat, LogLevel, LoggingConfig, StorageConfig, TallyConfig,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
