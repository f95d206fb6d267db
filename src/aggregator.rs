//! Usage aggregation
//!
//! A pure reduction from entries to [`UsageStats`]: overall totals plus
//! breakdowns by model, calendar day and project. Days are bucketed in a
//! caller-chosen time zone (local by default).
//!
//! Date-range views re-derive every total from the daily buckets they keep,
//! so a headline figure and the sum of the days it covers always agree.

use crate::catalog::project_display_name;
use crate::models::{DailyUsage, ModelUsage, ProjectUsage, TokenCounts, UsageEntry, UsageStats};
use crate::timestamp_parser::TimestampParser;
use chrono::{Local, NaiveDate, TimeZone, Timelike};
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct Aggregator;

impl Aggregator {
    /// Aggregate with days bucketed in the local time zone
    pub fn aggregate(entries: &[UsageEntry], session_count: usize) -> UsageStats {
        Self::aggregate_in(entries, session_count, &Local)
    }

    pub fn aggregate_in<Tz: TimeZone>(
        entries: &[UsageEntry],
        session_count: usize,
        tz: &Tz,
    ) -> UsageStats {
        let mut totals = TokenCounts::default();
        let mut total_cost = 0.0;
        let mut by_model: HashMap<&str, ModelUsage> = HashMap::new();
        let mut by_date: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();
        let mut by_project: HashMap<&str, ProjectUsage> = HashMap::new();

        for entry in entries {
            totals += entry.tokens;
            total_cost += entry.cost;

            let model = by_model
                .entry(entry.model.as_str())
                .or_insert_with(|| ModelUsage {
                    model: entry.model.clone(),
                    ..ModelUsage::default()
                });
            model.tokens += entry.tokens;
            model.total_cost += entry.cost;
            model.entry_count += 1;

            let local = entry.timestamp.with_timezone(tz);
            let day = by_date
                .entry(local.date_naive())
                .or_insert_with_key(|date| DailyUsage::new(*date));
            day.tokens += entry.tokens;
            day.total_cost += entry.cost;
            day.entry_count += 1;
            day.models.insert(entry.model.clone());
            day.hourly_costs[local.hour() as usize] += entry.cost;

            let project = by_project
                .entry(entry.project.as_str())
                .or_insert_with(|| ProjectUsage {
                    project: entry.project.clone(),
                    display_name: project_display_name(&entry.project),
                    tokens: TokenCounts::default(),
                    total_tokens: 0,
                    total_cost: 0.0,
                    entry_count: 0,
                    last_used: entry.timestamp,
                });
            project.tokens += entry.tokens;
            project.total_cost += entry.cost;
            project.entry_count += 1;
            project.last_used = project.last_used.max(entry.timestamp);
        }

        let mut by_model: Vec<ModelUsage> = by_model
            .into_values()
            .map(|mut model| {
                model.total_tokens = model.tokens.total();
                model
            })
            .collect();
        by_model.sort_by(|a, b| {
            b.total_cost
                .total_cmp(&a.total_cost)
                .then_with(|| a.model.cmp(&b.model))
        });

        let by_date: Vec<DailyUsage> = by_date
            .into_values()
            .map(|mut day| {
                day.total_tokens = day.tokens.total();
                day
            })
            .collect();

        let mut by_project: Vec<ProjectUsage> = by_project
            .into_values()
            .map(|mut project| {
                project.total_tokens = project.tokens.total();
                project
            })
            .collect();
        by_project.sort_by(|a, b| {
            b.last_used
                .cmp(&a.last_used)
                .then_with(|| a.project.cmp(&b.project))
        });

        UsageStats {
            total_cost,
            total_tokens: totals.total(),
            total_input: totals.input,
            total_output: totals.output,
            total_cache_write: totals.cache_write,
            total_cache_read: totals.cache_read,
            session_count,
            by_model,
            by_date,
            by_project,
        }
    }

    /// Distinct sessions among `entries`
    pub fn count_sessions(entries: &[UsageEntry]) -> usize {
        entries
            .iter()
            .map(UsageEntry::session_key)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Entries whose date in `tz` lies within `[start, end]`
    pub fn entries_in_range<'a, Tz: TimeZone>(
        entries: &'a [UsageEntry],
        start: NaiveDate,
        end: NaiveDate,
        tz: &'a Tz,
    ) -> impl Iterator<Item = &'a UsageEntry> + 'a {
        entries.iter().filter(move |entry| {
            let date = TimestampParser::local_date(entry.timestamp, tz);
            start <= date && date <= end
        })
    }
}

impl UsageStats {
    /// Days in `[start, end]` only, with totals recomputed from those days.
    ///
    /// Model and project breakdowns are not kept per day and come back empty;
    /// `session_count` is carried over unchanged.
    pub fn filter_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> UsageStats {
        let mut filtered = UsageStats {
            session_count: self.session_count,
            by_date: self
                .by_date
                .iter()
                .filter(|day| start <= day.date && day.date <= end)
                .cloned()
                .collect(),
            ..UsageStats::default()
        };
        filtered.rederive_totals();
        filtered
    }

    /// Recompute every headline total from `by_date`
    pub fn rederive_totals(&mut self) {
        let mut tokens = TokenCounts::default();
        let mut cost = 0.0;
        for day in &self.by_date {
            tokens += day.tokens;
            cost += day.total_cost;
        }

        self.total_cost = cost;
        self.total_tokens = tokens.total();
        self.total_input = tokens.input;
        self.total_output = tokens.output;
        self.total_cache_write = tokens.cache_write;
        self.total_cache_read = tokens.cache_read;
    }
}
