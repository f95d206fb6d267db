//! Core Data Models
//!
//! The data structures that flow through the ingestion pipeline, from parsed
//! records to query results.
//!
//! ## Data Flow
//!
//! 1. **Discovery**: [`FileMetadata`] - one per log file found on disk
//! 2. **Parsing**: [`UsageEntry`] - one per billable record, built by the parser
//! 3. **Caching**: [`CacheEntry`] - parsed entries of a file, keyed by its mtime
//! 4. **Results**: [`UsageStats`] and [`SessionBlock`] - derived per query,
//!    never cached across calls
//!
//! Result types serialize with camelCase field names so presentation layers
//! can forward them as JSON unchanged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::time::SystemTime;

/// Token counts by category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64, cache_write: u64, cache_read: u64) -> Self {
        Self {
            input,
            output,
            cache_write,
            cache_read,
        }
    }

    /// Sum of all categories, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.checked_total().unwrap_or(u64::MAX)
    }

    /// Sum of all categories, `None` if it does not fit in a `u64`
    pub fn checked_total(&self) -> Option<u64> {
        self.input
            .checked_add(self.output)?
            .checked_add(self.cache_write)?
            .checked_add(self.cache_read)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.input = self.input.saturating_add(rhs.input);
        self.output = self.output.saturating_add(rhs.output);
        self.cache_write = self.cache_write.saturating_add(rhs.cache_write);
        self.cache_read = self.cache_read.saturating_add(rhs.cache_read);
    }
}

/// A single billable usage record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    /// Decoded project path
    pub project: String,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub source_file: PathBuf,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
}

impl UsageEntry {
    /// Session this entry belongs to; records without a session id fall back
    /// to their source file (one file per work session).
    pub fn session_key(&self) -> String {
        match &self.session_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.source_file.to_string_lossy().into_owned(),
        }
    }
}

/// A log file found by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub path: PathBuf,
    /// Encoded project directory name, as it appears on disk
    pub project_dir: String,
    /// Approximated by the modification time; entries are re-sorted by their
    /// own timestamps before anything order-sensitive happens.
    pub earliest_timestamp: DateTime<Utc>,
    pub modification_time: SystemTime,
}

/// Parsed entries of one file; valid while the file's mtime is unchanged
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub modification_time: SystemTime,
    pub entries: Vec<UsageEntry>,
    /// Dedup keys of records this file dropped because another file held them
    pub dropped_keys: Vec<String>,
}

impl CacheEntry {
    pub fn is_valid_for(&self, current: SystemTime) -> bool {
        self.modification_time == current
    }
}

/// Token and cost consumption rate of a session block
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

/// Usage extrapolated to the end of a session block's window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedUsage {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub remaining_minutes: f64,
}

/// A time-bounded run of entries representing one continuous work session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Timestamp of the last real entry; `None` for gap blocks
    pub actual_end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_gap: bool,
    #[serde(skip)]
    pub entries: Vec<UsageEntry>,
    pub entry_count: usize,
    pub token_counts: TokenCounts,
    pub cost: f64,
    pub models: BTreeSet<String>,
    pub burn_rate: Option<BurnRate>,
    pub projected_usage: Option<ProjectedUsage>,
}

impl SessionBlock {
    pub fn total_tokens(&self) -> u64 {
        self.token_counts.total()
    }
}

/// Usage of one model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub tokens: TokenCounts,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub entry_count: u64,
}

/// Usage of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub tokens: TokenCounts,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub entry_count: u64,
    pub models: BTreeSet<String>,
    /// Cost per local hour of the day
    pub hourly_costs: [f64; 24],
}

impl DailyUsage {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            tokens: TokenCounts::default(),
            total_tokens: 0,
            total_cost: 0.0,
            entry_count: 0,
            models: BTreeSet::new(),
            hourly_costs: [0.0; 24],
        }
    }
}

/// Usage of one project
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsage {
    pub project: String,
    pub display_name: String,
    pub tokens: TokenCounts,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub entry_count: u64,
    pub last_used: DateTime<Utc>,
}

/// Aggregated statistics over a set of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub total_input: u64,
    pub total_output: u64,
    pub total_cache_write: u64,
    pub total_cache_read: u64,
    pub session_count: usize,
    pub by_model: Vec<ModelUsage>,
    /// Ascending by date
    pub by_date: Vec<DailyUsage>,
    pub by_project: Vec<ProjectUsage>,
}

impl UsageStats {
    /// Daily bucket for `date`, if any entry fell on it
    pub fn day(&self, date: NaiveDate) -> Option<&DailyUsage> {
        self.by_date
            .binary_search_by(|d| d.date.cmp(&date))
            .ok()
            .map(|i| &self.by_date[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_total_is_sum_of_categories() {
        let counts = TokenCounts::new(100, 50, 25, 10);
        assert_eq!(counts.total(), 185);
        assert!(!counts.is_empty());
        assert!(TokenCounts::default().is_empty());
    }

    #[test]
    fn test_token_counts_add_assign() {
        let mut counts = TokenCounts::new(1, 2, 3, 4);
        counts += TokenCounts::new(10, 20, 30, 40);
        assert_eq!(counts, TokenCounts::new(11, 22, 33, 44));
        assert_eq!(counts.total(), 110);
    }

    #[test]
    fn test_token_sums_saturate_instead_of_overflowing() {
        let huge = TokenCounts::new(u64::MAX, 1, 0, 0);
        assert_eq!(huge.checked_total(), None);
        assert_eq!(huge.total(), u64::MAX);

        let mut counts = TokenCounts::new(u64::MAX - 1, 0, 0, 0);
        counts += TokenCounts::new(5, 0, 0, 0);
        assert_eq!(counts.input, u64::MAX);
    }

    #[test]
    fn test_cache_entry_validity() {
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000);
        let entry = CacheEntry {
            modification_time: mtime,
            entries: Vec::new(),
            dropped_keys: Vec::new(),
        };
        assert!(entry.is_valid_for(mtime));
        assert!(!entry.is_valid_for(mtime + std::time::Duration::from_secs(1)));
    }

    #[test]
    fn test_session_key_falls_back_to_file() {
        let mut entry = UsageEntry {
            timestamp: Utc::now(),
            project: "/p".to_string(),
            model: "m".to_string(),
            tokens: TokenCounts::new(1, 0, 0, 0),
            cost: 0.0,
            source_file: PathBuf::from("/root/a.jsonl"),
            message_id: None,
            request_id: None,
            session_id: None,
        };
        assert_eq!(entry.session_key(), "/root/a.jsonl");
        entry.session_id = Some("s-1".to_string());
        assert_eq!(entry.session_key(), "s-1");
    }
}
