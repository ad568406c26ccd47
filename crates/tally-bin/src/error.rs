// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the tally binary.
//!
//! | Variant   | Exit code |
//! |-----------|-----------|
//! | `Config`  | 1         |
//! | `Logging` | 2         |
//! | `Render`  | 3         |
//! | `Storage` | 5         |

use tally_config::ConfigError;
use tally_core::StorageError;
use thiserror::Error;

/// Result type alias for tally-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that end a `tally` invocation.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error("logging: {0:#}")]
    Logging(anyhow::Error),

    /// Command output could not be rendered.
    #[error("rendering output: {0}")]
    Render(#[from] serde_json::Error),

    /// A backend operation failed.
    #[error("{action}: {source}")]
    Storage {
        /// What the binary was doing, e.g. `final flush`.
        action: String,
        /// Backend error.
        #[source]
        source: StorageError,
    },
}

impl BinError {
    /// Wraps a backend error with the action that produced it.
    pub fn storage(action: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            action: action.into(),
            source,
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Logging(_) => 2,
            Self::Render(_) => 3,
            Self::Storage { .. } => 5,
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain on stderr.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with its exit code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}
