// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shutdown triggering for the runtime.
//!
//! The first trigger wins: an OS signal (SIGTERM, SIGINT, SIGQUIT on Unix,
//! Ctrl+C elsewhere) or [`ShutdownHandle::request`]. Its reason is kept so
//! the runtime can log what ended the process.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// What ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM.
    Terminate,
    /// SIGINT or Ctrl+C.
    Interrupt,
    /// SIGQUIT.
    Quit,
    /// [`ShutdownHandle::request`] was called.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Quit => "SIGQUIT",
            ShutdownReason::Requested => "requested",
        })
    }
}

/// Cloneable trigger shared between the runtime and its embedders.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownHandle {
    /// Creates an untriggered handle.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Requests shutdown. Returns `false` if shutdown was already triggered.
    pub fn request(&self) -> bool {
        self.trigger(ShutdownReason::Requested)
    }

    /// Returns the reason once shutdown has been triggered.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.state.borrow()
    }

    fn trigger(&self, reason: ShutdownReason) -> bool {
        self.state.send_if_modified(|state| match state {
            Some(_) => false,
            None => {
                *state = Some(reason);
                true
            }
        })
    }

    /// Resolves when shutdown is triggered, returning the winning reason.
    ///
    /// Returns immediately if shutdown was triggered earlier.
    pub async fn wait(&self) -> ShutdownReason {
        let mut triggered = self.state.subscribe();

        tokio::select! {
            state = triggered.wait_for(Option::is_some) => {
                let reason = state.ok().and_then(|state| *state);
                reason.unwrap_or(ShutdownReason::Requested)
            }
            signal = os_signal() => {
                self.trigger(signal);
                // A concurrent request may have landed first.
                self.reason().unwrap_or(signal)
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(unix)]
async fn os_signal() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) {
        (Ok(mut term), Ok(mut int), Ok(mut quit)) => tokio::select! {
            _ = term.recv() => ShutdownReason::Terminate,
            _ = int.recv() => ShutdownReason::Interrupt,
            _ = quit.recv() => ShutdownReason::Quit,
        },
        (term, int, quit) => {
            let error = term.err().or(int.err()).or(quit.err());
            warn!(error = ?error, "Cannot register signal handlers, listening for Ctrl+C only");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn os_signal() -> ShutdownReason {
    ctrl_c().await
}

async fn ctrl_c() -> ShutdownReason {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl+C, only a requested shutdown will stop tally");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
    ShutdownReason::Interrupt
}
