// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `inspect` command.

use tally_config::TallyConfig;
use tally_core::Snapshot;

use crate::cli::{InspectArgs, OutputFormat};
use crate::error::{BinError, BinResult};
use crate::runtime::open_backend;

/// Loads the configured backend's snapshot and prints it.
pub async fn inspect(config: &TallyConfig, args: InspectArgs) -> BinResult<()> {
    let backend = open_backend(&config.storage).await?;
    let loaded = backend.load().await;
    let _ = backend.close().await;

    let snapshot = match loaded {
        Ok(snapshot) => snapshot.sorted(),
        Err(e) if e.is_not_found() => {
            println!("No snapshot stored ({})", backend.name());
            return Ok(());
        }
        Err(e) => return Err(BinError::storage("loading snapshot", e)),
    };

    println!("{}", render(&snapshot, args.format)?);
    Ok(())
}

fn render(snapshot: &Snapshot, format: OutputFormat) -> BinResult<String> {
    match format {
        OutputFormat::Json => Ok(snapshot.to_json_pretty()?),
        OutputFormat::Text => {
            let mut out = format!(
                "Snapshot v{} ({} gauges, {} counters)\n",
                snapshot.version,
                snapshot.gauges.len(),
                snapshot.counters.len()
            );
            for gauge in &snapshot.gauges {
                out.push_str(&format!("  gauge    {:<32} {}\n", gauge.name, gauge.value));
            }
            for counter in &snapshot.counters {
                out.push_str(&format!("  counter  {:<32} {}\n", counter.name, counter.value));
            }
            Ok(out.trim_end().to_string())
        }
    }
}
