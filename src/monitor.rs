//! Session windowing
//!
//! Segments a chronological entry stream into [`SessionBlock`]s, the unit a
//! live monitor reports on.
//!
//! ## Rules
//!
//! - A block opens at the first entry, with its start floored to the hour,
//!   and ends `duration` after that start.
//! - The next entry closes the block and opens a new one when it lies past
//!   the block's end, or when the idle time since the previous entry exceeds
//!   the gap threshold.
//! - A block is active while its last entry is younger than the activity
//!   threshold and its window has not ended.
//!
//! Burn rate and projection use the current time for active blocks and the
//! last entry for closed ones, so closed blocks report the rate they ended
//! with rather than decaying over time.

use crate::config::{SessionConfig, MAX_SESSION_HOURS, MAX_THRESHOLD_MINUTES};
use crate::models::{BurnRate, ProjectedUsage, SessionBlock, TokenCounts, UsageEntry};
use crate::timestamp_parser::TimestampParser;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRules {
    pub duration: Duration,
    pub gap_threshold: Duration,
    pub activity_threshold: Duration,
}

impl Default for SessionRules {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Out-of-range values are clamped into what `Config::validate` accepts
impl From<&SessionConfig> for SessionRules {
    fn from(config: &SessionConfig) -> Self {
        Self {
            duration: Duration::hours(config.duration_hours.clamp(1, MAX_SESSION_HOURS)),
            gap_threshold: Duration::minutes(config.gap_minutes.clamp(1, MAX_THRESHOLD_MINUTES)),
            activity_threshold: Duration::minutes(
                config.activity_minutes.clamp(1, MAX_THRESHOLD_MINUTES),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionWindower {
    rules: SessionRules,
}

impl SessionWindower {
    pub fn new(rules: SessionRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SessionRules {
        &self.rules
    }

    /// Session blocks in chronological order, evaluated at `now`
    pub fn build_blocks(&self, entries: &[UsageEntry], now: DateTime<Utc>) -> Vec<SessionBlock> {
        let mut sorted: Vec<&UsageEntry> = entries.iter().collect();
        sorted.sort_by_key(|entry| entry.timestamp);

        let mut blocks = Vec::new();
        let mut current: Vec<&UsageEntry> = Vec::new();
        let mut block_start = DateTime::<Utc>::MIN_UTC;

        for entry in sorted {
            if let Some(previous) = current.last() {
                let past_window = entry.timestamp > block_start + self.rules.duration;
                let idle_too_long = entry.timestamp - previous.timestamp > self.rules.gap_threshold;

                if past_window || idle_too_long {
                    blocks.push(self.close_block(block_start, &current, now));
                    current.clear();
                }
            }

            if current.is_empty() {
                block_start = TimestampParser::floor_to_hour(entry.timestamp);
            }
            current.push(entry);
        }

        if !current.is_empty() {
            blocks.push(self.close_block(block_start, &current, now));
        }

        blocks
    }

    /// Session blocks with synthetic gap blocks covering long idle stretches
    pub fn timeline(&self, entries: &[UsageEntry], now: DateTime<Utc>) -> Vec<SessionBlock> {
        let blocks = self.build_blocks(entries, now);
        let mut timeline: Vec<SessionBlock> = Vec::with_capacity(blocks.len() * 2);

        for block in blocks {
            let gap_start = timeline
                .last()
                .and_then(|previous| previous.actual_end_time)
                .map(|last_activity| last_activity + self.rules.duration);

            if let Some(gap_start) = gap_start {
                if block.start_time > gap_start {
                    timeline.push(gap_block(gap_start, block.start_time));
                }
            }
            timeline.push(block);
        }

        timeline
    }

    /// The active block with the most recent activity
    pub fn active_block(blocks: &[SessionBlock]) -> Option<&SessionBlock> {
        blocks
            .iter()
            .filter(|block| block.is_active && !block.is_gap)
            .max_by_key(|block| block.actual_end_time)
    }

    /// Largest token total of any finished block; `None` until one exists
    pub fn auto_token_limit(blocks: &[SessionBlock]) -> Option<u64> {
        blocks
            .iter()
            .filter(|block| !block.is_active && !block.is_gap)
            .map(SessionBlock::total_tokens)
            .max()
    }

    fn close_block(
        &self,
        start_time: DateTime<Utc>,
        entries: &[&UsageEntry],
        now: DateTime<Utc>,
    ) -> SessionBlock {
        let end_time = start_time + self.rules.duration;
        let actual_end_time = entries
            .last()
            .map(|entry| entry.timestamp)
            .unwrap_or(start_time);

        let mut token_counts = TokenCounts::default();
        let mut cost = 0.0;
        let mut models = BTreeSet::new();
        for entry in entries {
            token_counts += entry.tokens;
            cost += entry.cost;
            models.insert(entry.model.clone());
        }

        let is_active = now - actual_end_time < self.rules.activity_threshold && now < end_time;
        let reference = if is_active { now } else { actual_end_time };

        let elapsed_minutes = minutes(reference - start_time);
        let burn_rate = if elapsed_minutes > 0.0 {
            BurnRate {
                tokens_per_minute: token_counts.total() as f64 / elapsed_minutes,
                cost_per_hour: cost / elapsed_minutes * 60.0,
            }
        } else {
            BurnRate::default()
        };

        let remaining_minutes = minutes(end_time - reference).max(0.0);
        let projected_usage = ProjectedUsage {
            total_tokens: token_counts
                .total()
                .saturating_add((burn_rate.tokens_per_minute * remaining_minutes).round() as u64),
            total_cost: cost + burn_rate.cost_per_hour * remaining_minutes / 60.0,
            remaining_minutes,
        };

        SessionBlock {
            id: start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            start_time,
            end_time,
            actual_end_time: Some(actual_end_time),
            is_active,
            is_gap: false,
            entries: entries.iter().map(|entry| (*entry).clone()).collect(),
            entry_count: entries.len(),
            token_counts,
            cost,
            models,
            burn_rate: Some(burn_rate),
            projected_usage: Some(projected_usage),
        }
    }
}

fn gap_block(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> SessionBlock {
    SessionBlock {
        id: format!("gap-{}", start_time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        start_time,
        end_time,
        actual_end_time: None,
        is_active: false,
        is_gap: true,
        entries: Vec::new(),
        entry_count: 0,
        token_counts: TokenCounts::default(),
        cost: 0.0,
        models: BTreeSet::new(),
        burn_rate: None,
        projected_usage: None,
    }
}

fn minutes(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn at(ts: &str) -> DateTime<Utc> {
        TimestampParser::parse(ts).unwrap()
    }

    fn entry(ts: DateTime<Utc>, tokens: u64, cost: f64) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            project: "/p".to_string(),
            model: "claude-sonnet-4".to_string(),
            tokens: TokenCounts::new(tokens, 0, 0, 0),
            cost,
            source_file: PathBuf::from("/p/s.jsonl"),
            message_id: None,
            request_id: None,
            session_id: None,
        }
    }

    #[test]
    fn test_window_overflow_starts_new_block() {
        let t0 = at("2025-01-01T10:20:00Z");
        let entries = vec![
            entry(t0, 100, 1.0),
            entry(t0 + Duration::minutes(10), 100, 1.0),
            entry(t0 + Duration::hours(6), 100, 1.0),
        ];

        let blocks = SessionWindower::default().build_blocks(&entries, t0 + Duration::days(2));
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start_time, at("2025-01-01T10:00:00Z"));
        assert_eq!(blocks[0].end_time, at("2025-01-01T15:00:00Z"));
        assert_eq!(blocks[0].entry_count, 2);
        assert_eq!(blocks[0].id, "2025-01-01T10:00:00Z");
        assert_eq!(blocks[1].start_time, at("2025-01-01T16:00:00Z"));
    }

    #[test]
    fn test_idle_gap_starts_new_block() {
        let rules = SessionRules {
            gap_threshold: Duration::minutes(30),
            ..SessionRules::default()
        };
        let t0 = at("2025-01-01T10:00:00Z");
        let entries = vec![
            entry(t0, 1, 0.0),
            entry(t0 + Duration::minutes(20), 1, 0.0),
            entry(t0 + Duration::minutes(60), 1, 0.0),
        ];

        let blocks = SessionWindower::new(rules).build_blocks(&entries, t0 + Duration::days(1));
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].start_time, at("2025-01-01T11:00:00Z"));
    }

    #[test]
    fn test_default_gap_never_splits_inside_window() {
        // Five hours of silence already crosses the window end, so the
        // default gap threshold adds nothing
        let t0 = at("2025-01-01T10:00:00Z");
        let entries = vec![
            entry(t0, 1, 0.0),
            entry(t0 + Duration::hours(4) + Duration::minutes(59), 1, 0.0),
        ];
        let blocks = SessionWindower::default().build_blocks(&entries, t0 + Duration::days(1));
        assert_eq!(blocks.len(), 1);

        let rules = SessionRules {
            gap_threshold: Duration::minutes(30),
            ..SessionRules::default()
        };
        let blocks = SessionWindower::new(rules).build_blocks(&entries, t0 + Duration::days(1));
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_rules_clamp_out_of_range_config() {
        let config = SessionConfig {
            duration_hours: i64::MAX,
            gap_minutes: 0,
            activity_minutes: i64::MAX,
        };
        let rules = SessionRules::from(&config);
        assert_eq!(rules.duration, Duration::hours(MAX_SESSION_HOURS));
        assert_eq!(rules.gap_threshold, Duration::minutes(1));
        assert_eq!(rules.activity_threshold, Duration::minutes(MAX_THRESHOLD_MINUTES));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let t0 = at("2025-01-01T10:00:00Z");
        let entries = vec![
            entry(t0 + Duration::minutes(30), 1, 0.0),
            entry(t0, 1, 0.0),
        ];
        let blocks = SessionWindower::default().build_blocks(&entries, t0);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].actual_end_time, Some(t0 + Duration::minutes(30)));
    }

    #[test]
    fn test_active_block_burn_rate_and_projection() {
        let start = at("2025-01-01T10:00:00Z");
        let entries = vec![
            entry(start + Duration::minutes(10), 3_000, 1.5),
            entry(start + Duration::minutes(50), 3_000, 1.5),
        ];
        let now = start + Duration::minutes(60);

        let blocks = SessionWindower::default().build_blocks(&entries, now);
        let block = &blocks[0];
        assert!(block.is_active);

        let rate = block.burn_rate.unwrap();
        assert!((rate.tokens_per_minute - 100.0).abs() < 1e-9);
        assert!((rate.cost_per_hour - 3.0).abs() < 1e-9);

        let projected = block.projected_usage.unwrap();
        assert!((projected.remaining_minutes - 240.0).abs() < 1e-9);
        assert_eq!(projected.total_tokens, 6_000 + 24_000);
        assert!((projected.total_cost - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_block_uses_last_activity() {
        let start = at("2025-01-01T10:00:00Z");
        let entries = vec![entry(start + Duration::minutes(30), 600, 0.6)];
        let now = start + Duration::days(1);

        let blocks = SessionWindower::default().build_blocks(&entries, now);
        let block = &blocks[0];
        assert!(!block.is_active);
        assert!((block.burn_rate.unwrap().tokens_per_minute - 20.0).abs() < 1e-9);
        let projected = block.projected_usage.unwrap();
        assert!((projected.remaining_minutes - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_has_zero_burn_rate() {
        let start = at("2025-01-01T10:00:00Z");
        let blocks = SessionWindower::default().build_blocks(&[entry(start, 10, 1.0)], start);
        let rate = blocks[0].burn_rate.unwrap();
        assert_eq!(rate.tokens_per_minute, 0.0);
        assert_eq!(rate.cost_per_hour, 0.0);
    }

    #[test]
    fn test_inactive_after_activity_threshold() {
        let rules = SessionRules {
            activity_threshold: Duration::minutes(5),
            ..SessionRules::default()
        };
        let start = at("2025-01-01T10:00:00Z");
        let blocks = SessionWindower::new(rules)
            .build_blocks(&[entry(start, 10, 1.0)], start + Duration::minutes(6));
        assert!(!blocks[0].is_active);
    }

    #[test]
    fn test_active_block_prefers_latest_activity() {
        let t0 = at("2025-01-01T10:00:00Z");
        let windower = SessionWindower::default();
        let mut blocks = windower.build_blocks(
            &[entry(t0, 1, 0.0), entry(t0 + Duration::hours(6), 1, 0.0)],
            t0 + Duration::hours(7),
        );
        assert_eq!(blocks.len(), 2);
        blocks[0].is_active = true;
        blocks[1].is_active = true;

        let active = SessionWindower::active_block(&blocks).unwrap();
        assert_eq!(active.actual_end_time, Some(t0 + Duration::hours(6)));
        assert!(SessionWindower::active_block(&[]).is_none());
    }

    #[test]
    fn test_auto_token_limit() {
        let t0 = at("2025-01-01T10:00:00Z");
        let windower = SessionWindower::default();

        let only_active = windower.build_blocks(&[entry(t0, 500, 0.0)], t0 + Duration::minutes(1));
        assert_eq!(SessionWindower::auto_token_limit(&only_active), None);

        let blocks = windower.build_blocks(
            &[
                entry(t0, 500, 0.0),
                entry(t0 + Duration::hours(6), 900, 0.0),
                entry(t0 + Duration::hours(12), 5_000, 0.0),
            ],
            t0 + Duration::hours(12) + Duration::minutes(1),
        );
        assert!(blocks[2].is_active);
        assert_eq!(SessionWindower::auto_token_limit(&blocks), Some(900));
    }

    #[test]
    fn test_timeline_inserts_gap_blocks() {
        let t0 = at("2025-01-01T10:00:00Z");
        let entries = vec![entry(t0, 1, 0.0), entry(t0 + Duration::hours(20), 1, 0.0)];
        let windower = SessionWindower::default();

        assert_eq!(windower.build_blocks(&entries, t0 + Duration::days(2)).len(), 2);

        let timeline = windower.timeline(&entries, t0 + Duration::days(2));
        assert_eq!(timeline.len(), 3);
        let gap = &timeline[1];
        assert!(gap.is_gap);
        assert_eq!(gap.start_time, t0 + Duration::hours(5));
        assert_eq!(gap.end_time, t0 + Duration::hours(20));
        assert_eq!(SessionWindower::auto_token_limit(&timeline), Some(1));
    }

    #[test]
    fn test_empty_stream() {
        let windower = SessionWindower::default();
        let blocks = windower.build_blocks(&[], Utc::now());
        assert!(blocks.is_empty());
        assert!(SessionWindower::active_block(&blocks).is_none());
        assert_eq!(SessionWindower::auto_token_limit(&blocks), None);
    }
}
