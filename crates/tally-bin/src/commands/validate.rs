// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use serde_json::json;
use tally_config::{BackendConfig, TallyConfig};
use tally_store::FlushMode;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::BinResult;

/// Executes the `validate` command.
///
/// The configuration has already been loaded and validated by the time this
/// runs; this prints the effective storage mode and any warnings.
pub fn validate(cli: &Cli, config: &TallyConfig, args: ValidateArgs) -> BinResult<()> {
    let source = cli
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());

    let storage = &config.storage;
    let mode = storage.coordinator_config().flush_mode();
    let warnings = collect_warnings(config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", source);
            println!();
            println!("Storage:");
            println!("  Mode:     {}", describe_mode(mode));
            println!("  Backend:  {}", describe_backend(&storage.backend));
            println!("  Restore:  {}", if storage.restore { "enabled" } else { "disabled" });
            println!("  Attempts: {}", storage.retry.max_attempts());

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Effective configuration:");
                println!("{}", to_pretty(config)?);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "valid": true,
                "config_path": source,
                "storage": {
                    "mode": mode.to_string(),
                    "backend": storage.backend.kind(),
                    "restore": storage.restore,
                    "max_attempts": storage.retry.max_attempts(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(config) } else { None },
            });
            println!("{}", to_pretty(&output)?);
        }
    }

    Ok(())
}

fn describe_mode(mode: FlushMode) -> String {
    match mode {
        FlushMode::Interval(period) => format!("interval (every {}s)", period.as_secs()),
        FlushMode::Debounced => "debounced (flush after every change)".to_string(),
    }
}

fn describe_backend(backend: &BackendConfig) -> String {
    match backend {
        BackendConfig::File { path } => format!("file ({})", path.display()),
        BackendConfig::Sqlite { dsn, .. } => format!("sqlite ({})", dsn),
        BackendConfig::Memory => "memory".to_string(),
    }
}

fn collect_warnings(config: &TallyConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let storage = &config.storage;

    if let BackendConfig::Memory = storage.backend {
        warnings.push("Memory backend does not survive restarts".to_string());
    }

    if let BackendConfig::File { path } = &storage.backend {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                warnings.push(format!(
                    "Snapshot directory does not exist yet and will be created: {}",
                    parent.display()
                ));
            }
        }
    }

    if storage.flush_timeout().as_secs() >= storage.store_interval_secs && !storage.is_debounced() {
        warnings.push("flush_timeout_ms is not shorter than the store interval".to_string());
    }

    warnings
}

fn to_pretty<T: serde::Serialize>(value: &T) -> BinResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
