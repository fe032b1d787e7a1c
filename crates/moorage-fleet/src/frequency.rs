// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frequency alias resolution.
//!
//! Scheduled jobs carry either raw cron syntax or one of a small set of
//! human-readable aliases. Aliases resolve through a fixed lookup table;
//! anything else passes through unmodified on the assumption it is
//! already valid cron - invalid syntax is a caller-configuration error
//! surfaced where the job was registered, not validated here.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::Result;

/// Resolve a named alias to canonical five-field cron syntax. Unknown
/// strings pass through unmodified.
pub fn resolve_frequency(frequency: &str) -> &str {
    match frequency {
        "every_minute" => "* * * * *",
        "every_five_minutes" => "*/5 * * * *",
        "every_ten_minutes" => "*/10 * * * *",
        "every_fifteen_minutes" => "*/15 * * * *",
        "every_thirty_minutes" => "*/30 * * * *",
        "hourly" => "0 * * * *",
        "daily" | "every_night" => "0 0 * * *",
        "weekly" => "0 0 * * SUN",
        "monthly" => "0 0 1 * *",
        "yearly" => "0 0 1 1 *",
        other => other,
    }
}

/// Parse a frequency into a schedule.
///
/// The cron crate expects a seconds column; standard five-field
/// expressions are normalized by prepending one.
pub fn to_schedule(frequency: &str) -> Result<Schedule> {
    let resolved = resolve_frequency(frequency);
    let normalized = if resolved.split_whitespace().count() == 5 {
        format!("0 {resolved}")
    } else {
        resolved.to_string()
    };
    Ok(Schedule::from_str(&normalized)?)
}

/// Whether a schedule fires within the half-open window `(after, until]`.
pub fn due_in_window(schedule: &Schedule, after: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    schedule
        .after(&after)
        .next()
        .map(|next| next <= until)
        .unwrap_or(false)
}
