//! Date-range resolution and upstream date parsing helpers.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{FeedError, Result};
use crate::models::DateRange;

impl DateRange {
    /// Resolve the window start relative to `now`.
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DateRange::Day => now - Duration::hours(24),
            DateRange::Week => now - Duration::days(7),
            DateRange::Month => now - Duration::days(30),
        }
    }

    /// Resolve the window start relative to the current time.
    pub fn start(&self) -> DateTime<Utc> {
        self.start_from(Utc::now())
    }
}

/// Parse a `YYYY-MM-DD` calendar date as UTC midnight.
///
/// Used by the CISA KEV feed (`dateAdded`) and the KISA RSS feed (`pubDate`),
/// both of which carry date-only granularity.
pub fn parse_ymd(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| FeedError::date_parse(value, e.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FeedError::date_parse(value, "invalid time of day"))?;
    Ok(midnight.and_utc())
}
