//! Clock helpers shared by the guard primitives.
//!
//! Control-plane state is timestamped in Unix epoch milliseconds so the
//! pure-logic types can take an explicit `now_ms` in tests and wall-clock
//! time in production.

use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// UTC hour stamp (`YYYYMMDDHH`) for hourly counter keys.
pub fn hour_stamp(now_ms: u64) -> String {
    format_utc(now_ms, "%Y%m%d%H")
}

/// UTC day stamp (`YYYYMMDD`) for daily counter keys.
pub fn day_stamp(now_ms: u64) -> String {
    format_utc(now_ms, "%Y%m%d")
}

/// UTC calendar day (`YYYY-MM-DD`), used for daily budget baselines.
pub fn utc_day(now_ms: u64) -> String {
    format_utc(now_ms, "%Y-%m-%d")
}

fn format_utc(now_ms: u64, fmt: &str) -> String {
    DateTime::from_timestamp_millis(now_ms as i64)
        .map(|dt| dt.format(fmt).to_string())
        .unwrap_or_default()
}
