// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! - `test_config_file_*`: files on disk in each supported format
//! - `test_config_wiring_*`: loaded settings driving real components

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tally_config::{BackendConfig, ConfigFormat, ConfigLoader, EnvSource, TallyConfig};
use tally_core::{MetricRegistry, RetryConfig};
use tally_store::{
    DurableBackend, FileSnapshotBackend, FlushMode, PersistenceCoordinator, RelationalBackend,
    RestoreFailurePolicy,
};
use tally_tests::common::{fixtures::ConfigFixtures, temp_test_dir};

fn loader(vars: &[(&str, &str)]) -> ConfigLoader {
    ConfigLoader::new().with_env_source(vars.iter().copied().collect::<EnvSource>())
}

fn write_file(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

// =============================================================================
// Files
// =============================================================================

#[tokio::test]
async fn test_config_file_yaml() {
    let dir = temp_test_dir("tally-config");
    let path = write_file(
        dir.path(),
        "tally.yaml",
        &ConfigFixtures::file_yaml("/var/lib/tally/metrics.json", 15),
    );

    let config = loader(&[]).load(&path).unwrap();
    assert_eq!(config.storage.store_interval_secs, 15);
    assert_eq!(
        config.storage.backend,
        BackendConfig::File {
            path: PathBuf::from("/var/lib/tally/metrics.json")
        }
    );
    assert_eq!(config.logging.level.as_str(), "debug");
}

#[tokio::test]
async fn test_config_file_toml_sqlite() {
    let dir = temp_test_dir("tally-config");
    let path = write_file(dir.path(), "tally.toml", &ConfigFixtures::sqlite_toml("metrics.db"));

    let config = loader(&[]).load(&path).unwrap();
    let storage = &config.storage;
    assert!(storage.is_debounced());
    assert_eq!(storage.restore_failure, RestoreFailurePolicy::Abort);
    assert_eq!(storage.retry.max_attempts(), 5);

    let sqlite = storage.sqlite_config().unwrap();
    assert_eq!(sqlite.dsn, "metrics.db");
    assert_eq!(sqlite.busy_timeout, Duration::from_millis(250));
    assert!(matches!(sqlite.retry, RetryConfig::Exponential { max_retries: 4, .. }));
}

#[tokio::test]
async fn test_config_file_yaml_placeholders_and_overrides() {
    let dir = temp_test_dir("tally-config");
    let path = write_file(
        dir.path(),
        "tally.yml",
        "storage:\n  store_interval_secs: ${TALLY_TEST_INTERVAL:120}\n",
    );

    let config = loader(&[("TALLY_RESTORE", "off")]).load(&path).unwrap();
    assert_eq!(config.storage.store_interval_secs, 120);
    assert!(!config.storage.restore);

    let config = loader(&[("TALLY_TEST_INTERVAL", "7"), ("TALLY_STORE_INTERVAL", "0")])
        .load(&path)
        .unwrap();
    // Overrides apply after placeholders.
    assert_eq!(config.storage.store_interval_secs, 0);
}

#[tokio::test]
async fn test_config_file_rejects_unknown_keys() {
    let dir = temp_test_dir("tally-config");
    let path = write_file(
        dir.path(),
        "tally.json",
        r#"{"storage": {"backend": {"kind": "file", "path": "/tmp/x.json", "mode": "0600"}}}"#,
    );

    let err = loader(&[]).load(&path).unwrap_err();
    assert_eq!(err.error_type(), "parse");
}

#[tokio::test]
async fn test_config_file_rejects_oversized_retry_schedule() {
    let delays = vec!["100"; 17].join(", ");
    let content = format!(
        "storage:\n  retry:\n    kind: fixed\n    delays_ms: [{}]\n",
        delays
    );

    let err = loader(&[])
        .load_from_str(&content, ConfigFormat::Yaml)
        .unwrap_err();
    assert_eq!(err.error_type(), "validation");
}

#[tokio::test]
async fn test_config_defaults_without_file() {
    let dir = temp_test_dir("tally-config");
    let config = loader(&[])
        .load_or_default(dir.path().join("missing.yaml"))
        .unwrap();

    assert_eq!(config, TallyConfig::default());
    assert_eq!(
        config.storage.coordinator_config().flush_mode(),
        FlushMode::Interval(Duration::from_secs(300))
    );
}

// =============================================================================
// Wiring
// =============================================================================

#[tokio::test]
async fn test_config_wiring_file_backend_from_env() {
    let dir = temp_test_dir("tally-config");
    let target = dir.path().join("state").join("metrics.json");

    let config = loader(&[
        ("TALLY_FILE_STORAGE_PATH", target.to_str().unwrap()),
        ("TALLY_STORE_INTERVAL", "0"),
    ])
    .load_defaults()
    .unwrap();

    let BackendConfig::File { path } = &config.storage.backend else {
        panic!("expected file backend");
    };
    let backend = Arc::new(FileSnapshotBackend::new(path));
    let registry = Arc::new(MetricRegistry::new());
    let coordinator = PersistenceCoordinator::new(
        registry.clone(),
        backend.clone(),
        config.storage.coordinator_config(),
    );
    assert_eq!(coordinator.flush_mode(), FlushMode::Debounced);

    coordinator.start().await.unwrap();
    registry.update_counter("PollCount", 1).unwrap();
    coordinator.stop().await.unwrap();

    assert_eq!(backend.load().await.unwrap().counters[0].value, 1);
    assert!(target.exists());
}

#[tokio::test]
async fn test_config_wiring_sqlite_backend_from_env() {
    let dir = temp_test_dir("tally-config");
    let dsn = dir.path().join("metrics.db").display().to_string();

    let config = loader(&[
        ("TALLY_FILE_STORAGE_PATH", "/ignored.json"),
        ("TALLY_DATABASE_DSN", dsn.as_str()),
    ])
    .load_defaults()
    .unwrap();

    let sqlite = config.storage.sqlite_config().expect("sqlite selected");
    let backend = RelationalBackend::open(sqlite).await.unwrap();
    assert_eq!(backend.dsn(), dsn);
    assert!(backend.load().await.unwrap_err().is_not_found());
}
