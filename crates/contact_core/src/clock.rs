//! Wall-clock helpers.
//!
//! Timestamps are stored as epoch milliseconds; calendar math uses UTC dates.

use chrono::{DateTime, NaiveDate, Utc};

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// UTC calendar date of an epoch-millisecond timestamp.
pub fn epoch_ms_to_date(epoch_ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms).map(|value| value.date_naive())
}

/// Whole days from `earlier` to `later`; negative when `earlier` is in the future.
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    later.signed_duration_since(earlier).num_days()
}
