// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry strategies for durable backend operations.
//!
//! A strategy only decides *whether* and *how long to wait* before the next
//! attempt; the caller (the relational unit of work) owns the loop, the
//! transaction and the cancellable wait.
//!
//! Only transient errors ([`StorageError::is_transient`]) are ever retried.
//! Every other failure is surfaced on the spot, whatever the strategy.
//!
//! # Built-in Strategies
//!
//! - [`FixedSchedule`]: an explicit list of delays (default: 1s, 3s, 5s)
//! - [`ExponentialBackoff`]: exponentially growing delays with optional jitter
//! - [`NoRetry`]: fail on the first error
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tally_core::error::StorageError;
//! use tally_core::retry::{FixedSchedule, RetryDecision, RetryStrategy};
//!
//! let strategy = FixedSchedule::default();
//! let error = StorageError::connection("connection refused");
//!
//! assert_eq!(strategy.should_retry(&error, 1), RetryDecision::Retry(Duration::from_secs(1)));
//! assert_eq!(strategy.should_retry(&error, 4), RetryDecision::DoNotRetry);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Maximum number of entries accepted in a fixed retry schedule.
pub const MAX_SCHEDULE_LEN: usize = 16;

// =============================================================================
// Retry Configuration
// =============================================================================

/// Serializable retry policy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RetryConfig {
    /// Wait the listed delays between attempts.
    Fixed {
        /// Delay before each retry, in order.
        #[serde(rename = "delays_ms", with = "duration_millis_vec")]
        delays: Vec<Duration>,
    },

    /// Exponentially growing delays.
    Exponential {
        /// Retries after the first attempt.
        max_retries: u32,
        /// Delay before the first retry.
        #[serde(rename = "initial_delay_ms", with = "duration_millis")]
        initial_delay: Duration,
        /// Upper bound for any single delay.
        #[serde(rename = "max_delay_ms", with = "duration_millis")]
        max_delay: Duration,
        /// Growth factor between consecutive delays.
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        /// Jitter factor (0.0 to 1.0).
        #[serde(default)]
        jitter: f64,
    },

    /// Never retry.
    None,
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Fixed {
            delays: FixedSchedule::default().delays().to_vec(),
        }
    }
}

impl RetryConfig {
    /// Builds the strategy this configuration describes.
    pub fn build(&self) -> Arc<dyn RetryStrategy> {
        match self {
            RetryConfig::Fixed { delays } => Arc::new(FixedSchedule::new(delays.clone())),
            RetryConfig::Exponential {
                max_retries,
                initial_delay,
                max_delay,
                multiplier,
                jitter,
            } => Arc::new(
                ExponentialBackoff::new(*max_retries, *initial_delay, *max_delay)
                    .with_multiplier(*multiplier)
                    .with_jitter(*jitter),
            ),
            RetryConfig::None => Arc::new(NoRetry),
        }
    }

    /// Returns the total number of attempts, first try included.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryConfig::Fixed { delays } => delays.len() as u32 + 1,
            RetryConfig::Exponential { max_retries, .. } => max_retries + 1,
            RetryConfig::None => 1,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_millis_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(delays: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: Vec<u64> = delays.iter().map(|d| d.as_millis() as u64).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Vec::<u64>::deserialize(deserializer)?;
        Ok(millis.into_iter().map(Duration::from_millis).collect())
    }
}

// =============================================================================
// Retry Decision
// =============================================================================

/// Decision on whether to retry an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Do not retry, return the error.
    DoNotRetry,
}

// =============================================================================
// Retry Strategy Trait
// =============================================================================

/// Decides when a failed storage operation should be attempted again.
pub trait RetryStrategy: Send + Sync + std::fmt::Debug {
    /// Returns the name of this strategy for logging.
    fn name(&self) -> &str;

    /// Decides what to do after attempt number `attempt` (1-based) failed
    /// with `error`.
    fn should_retry(&self, error: &StorageError, attempt: u32) -> RetryDecision;
}

// =============================================================================
// No Retry
// =============================================================================

/// A strategy that never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn name(&self) -> &str {
        "no_retry"
    }

    fn should_retry(&self, _error: &StorageError, _attempt: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

// =============================================================================
// Fixed Schedule
// =============================================================================

/// Retries transient failures after each delay of an explicit schedule.
///
/// With delays `[d1, d2, d3]` an operation runs at most four times: once
/// immediately, then after `d1`, `d2` and `d3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchedule {
    delays: Vec<Duration>,
}

impl FixedSchedule {
    /// Creates a schedule from the delays between attempts.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Returns the configured delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for FixedSchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetryStrategy for FixedSchedule {
    fn name(&self) -> &str {
        "fixed_schedule"
    }

    fn should_retry(&self, error: &StorageError, attempt: u32) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::DoNotRetry;
        }

        match attempt
            .checked_sub(1)
            .and_then(|index| self.delays.get(index as usize))
        {
            Some(delay) => RetryDecision::Retry(*delay),
            None => RetryDecision::DoNotRetry,
        }
    }
}

// =============================================================================
// Exponential Backoff
// =============================================================================

/// Retries transient failures with exponentially increasing delays.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy with a multiplier of 2.
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let multiplied = base_ms * self.multiplier.powi(exponent);
        let capped = multiplied.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let random: f64 = rand::random();
            (random * 2.0 - 1.0) * jitter_range
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, error: &StorageError, attempt: u32) -> RetryDecision {
        if !error.is_transient() || attempt > self.max_retries {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry(self.calculate_delay(attempt))
    }
}

// =============================================================================
// Tests
// =============================================================================
