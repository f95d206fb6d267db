use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

/// Parses the ISO-8601 timestamps found in usage records and does the
/// calendar arithmetic the rest of the crate needs.
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a `DateTime<Utc>`.
    /// Accepts `Z` suffixes, explicit offsets and offset-less values (read as UTC).
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        let trimmed = timestamp_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Truncate to the top of the containing hour (UTC)
    pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts)
    }

    /// Calendar date of `ts` as seen in `tz`
    pub fn local_date<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> NaiveDate {
        ts.with_timezone(tz).date_naive()
    }

    /// Start of the current local day, in UTC
    pub fn start_of_today() -> DateTime<Utc> {
        Self::start_of_day(Local::now().date_naive(), &Local)
    }

    /// First instant of `date` in `tz`, in UTC.
    /// Falls back to the UTC midnight when the local midnight does not exist.
    pub fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
        let midnight = date.and_time(chrono::NaiveTime::MIN);
        tz.from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc())
    }
}
