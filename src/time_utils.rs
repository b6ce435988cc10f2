// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, FixedOffset, TimeZone};

/// Format a unix timestamp (seconds) as `yyyyMMdd_HHmm` in the given offset.
///
/// Returns `None` for timestamps chrono cannot represent.
pub fn format_file_timestamp(unix_secs: i64, offset: &FixedOffset) -> Option<String> {
    let date: DateTime<FixedOffset> = offset.timestamp_opt(unix_secs, 0).single()?;
    Some(date.format("%Y%m%d_%H%M").to_string())
}
