// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Overflow-checked counter accumulation.
//!
//! Every counter update in tally goes through [`accumulate`], so the
//! overflow policy is the same wherever a counter is added to.

use crate::error::OverflowError;

/// Returns `current + delta`, or an [`OverflowError`] if the sum leaves the
/// `i64` range in either direction.
///
/// # Examples
///
/// ```
/// use tally_core::counter::accumulate;
///
/// assert_eq!(accumulate(40, 2).unwrap(), 42);
/// assert!(accumulate(i64::MAX, 1).is_err());
/// assert!(accumulate(i64::MIN, -1).is_err());
/// ```
pub fn accumulate(current: i64, delta: i64) -> Result<i64, OverflowError> {
    current
        .checked_add(delta)
        .ok_or_else(|| OverflowError::new(current, delta))
}
