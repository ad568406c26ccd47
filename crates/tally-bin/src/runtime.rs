// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service runtime orchestration.
//!
//! Wires the registry, the configured durable backend, and the persistence
//! coordinator together, then runs until shutdown is signaled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tally_config::{BackendConfig, ConfigLoader, StorageConfig, TallyConfig};
use tally_core::MetricRegistry;
use tally_store::{
    DurableBackend, FileSnapshotBackend, MemoryBackend, PersistenceCoordinator, RelationalBackend,
    SqliteConfig,
};

use crate::cli::DEFAULT_CONFIG_PATH;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownHandle;

// =============================================================================
// Backend Construction
// =============================================================================

/// Opens the durable backend selected by the storage configuration.
pub async fn open_backend(storage: &StorageConfig) -> BinResult<Arc<dyn DurableBackend>> {
    let backend: Arc<dyn DurableBackend> = match &storage.backend {
        BackendConfig::File { path } => Arc::new(FileSnapshotBackend::new(path)),
        BackendConfig::Sqlite {
            dsn,
            busy_timeout_ms,
        } => {
            let config = SqliteConfig::new(dsn.clone())
                .with_busy_timeout(Duration::from_millis(*busy_timeout_ms))
                .with_retry(storage.retry.clone());
            let backend = RelationalBackend::open(config)
                .await
                .map_err(|e| BinError::storage(format!("opening database '{}'", dsn), e))?
                .with_operation_timeout(storage.flush_timeout());
            Arc::new(backend)
        }
        BackendConfig::Memory => {
            warn!("Memory backend selected, metrics will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };

    Ok(backend)
}

/// Loads configuration from `path`, or from `tally.yaml` (falling back to
/// defaults) when no path is given.
pub fn load_config(path: Option<&Path>) -> BinResult<TallyConfig> {
    let loader = ConfigLoader::new();
    let config = match path {
        Some(path) => loader.load(path)?,
        None => loader.load_or_default(DEFAULT_CONFIG_PATH)?,
    };
    Ok(config)
}

// =============================================================================
// TallyRuntime
// =============================================================================

/// The service runtime.
///
/// The registry is created up front so callers embedding the runtime can
/// hand it to their request handlers before calling [`TallyRuntime::run`].
pub struct TallyRuntime {
    config: Arc<TallyConfig>,
    registry: Arc<MetricRegistry>,
    shutdown: ShutdownHandle,
}

impl TallyRuntime {
    /// Creates a new runtime.
    pub fn new(config: TallyConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(MetricRegistry::new()),
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Returns the live registry.
    pub fn registry(&self) -> Arc<MetricRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns a handle that can stop the runtime.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TallyConfig {
        &self.config
    }

    /// Runs until shutdown is signaled, then performs the final flush.
    ///
    /// Returns the final flush result.
    pub async fn run(self) -> BinResult<()> {
        info!("Starting tally v{}", tally_core::VERSION);

        let storage = &self.config.storage;
        let backend = open_backend(storage).await?;
        let coordinator = PersistenceCoordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&backend),
            storage.coordinator_config(),
        );

        coordinator
            .start()
            .await
            .map_err(|e| BinError::storage("restore", e))?;

        info!(
            backend = backend.name(),
            mode = %coordinator.flush_mode(),
            gauges = self.registry.list_gauges().len(),
            counters = self.registry.list_counters().len(),
            "tally is ready"
        );

        let reason = self.shutdown.wait().await;
        info!(%reason, "Shutting down, running final flush");

        let result = coordinator.stop().await;

        if let Err(e) = backend.close().await {
            warn!(error = %e, "Failed to close backend");
        }

        match result {
            Ok(()) => {
                info!("tally shutdown complete");
                Ok(())
            }
            Err(e) => Err(BinError::storage("final flush", e)),
        }
    }
}

impl std::fmt::Debug for TallyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TallyRuntime")
            .field("backend", &self.config.storage.backend.kind())
            .field("metrics", &self.registry.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the runtime.
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<TallyConfig>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: TallyConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<TallyRuntime> {
        let config = match self.config {
            Some(cfg) => cfg,
            None => load_config(self.config_path.as_deref())?,
        };

        Ok(TallyRuntime::new(config))
    }
}

// =============================================================================
// Tests
// =============================================================================
