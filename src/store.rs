//! Usage store
//!
//! [`UsageStore`] is the single owner of the file catalog, the entry cache and
//! the shared deduplication set. Every query refreshes that state (discover,
//! then load) while holding one async mutex, so queries never observe a cache
//! in the middle of an update. The parse work itself runs on tokio's blocking
//! pool.
//!
//! ```no_run
//! use usage_monitor::{Config, UsageStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = UsageStore::new(&Config::load()?);
//! let stats = store.get_usage_stats().await?;
//! println!("${:.2} over {} sessions", stats.total_cost, stats.session_count);
//!
//! if let Some(block) = store.get_active_session_block().await? {
//!     println!("active block started {}", block.start_time);
//! }
//! # Ok(())
//! # }
//! ```

use crate::aggregator::Aggregator;
use crate::cache::{EntryCache, LoadReport};
use crate::catalog::FileCatalog;
use crate::config::{CacheConfig, Config, ProcessingConfig, TimeZoneSetting};
use crate::dedup::Deduplicator;
use crate::logging::new_scan_id;
use crate::models::{SessionBlock, UsageEntry, UsageStats};
use crate::monitor::{SessionRules, SessionWindower};
use crate::parser::EntryParser;
use crate::pricing::PricingResolver;
use crate::timestamp_parser::TimestampParser;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn};

/// Mutable state, only ever touched with the store's lock held
struct StoreState {
    catalog: FileCatalog,
    cache: EntryCache,
    dedup: Deduplicator,
}

impl StoreState {
    fn new(cache: &CacheConfig, processing: &ProcessingConfig) -> Self {
        Self {
            catalog: FileCatalog::new(cache),
            cache: EntryCache::new(processing.clone()),
            dedup: Deduplicator::new(),
        }
    }
}

pub struct UsageStore {
    root: PathBuf,
    parser: Arc<EntryParser>,
    windower: SessionWindower,
    timezone: TimeZoneSetting,
    cache_config: CacheConfig,
    processing: ProcessingConfig,
    // `None` only while a refresh has the state out on the blocking pool
    state: Mutex<Option<StoreState>>,
}

impl UsageStore {
    /// Store reading `<data_dir>/projects` as configured
    pub fn new(config: &Config) -> Self {
        Self::with_root(config.paths.projects_dir(), config)
    }

    /// Store reading an explicit projects directory
    pub fn with_root(root: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            root: root.into(),
            parser: Arc::new(EntryParser::new(PricingResolver::from_config(&config.pricing))),
            windower: SessionWindower::new(SessionRules::from(&config.session)),
            timezone: config.reporting.timezone,
            cache_config: config.cache.clone(),
            processing: config.processing.clone(),
            state: Mutex::new(Some(StoreState::new(&config.cache, &config.processing))),
        }
    }

    /// Load configuration from files and environment, then build a store
    pub fn from_env() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Ok(Self::new(&config))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bring the cache up to date and report what it took
    pub async fn refresh(&self) -> Result<LoadReport> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    pub async fn get_usage_stats(&self) -> Result<UsageStats> {
        let entries = self.refresh().await?.entries;
        let session_count = Aggregator::count_sessions(&entries);
        Ok(self.aggregate(&entries, session_count))
    }

    /// Stats over the entries dated within `[start, end]`.
    ///
    /// Totals are re-derived from the daily buckets so the headline figures
    /// always equal the sum of the days shown.
    pub async fn get_usage_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<UsageStats> {
        let entries = self.refresh().await?.entries;
        let in_range = self.entries_in_range(&entries, start, end);
        let session_count = Aggregator::count_sessions(&in_range);

        let mut stats = self.aggregate(&in_range, session_count);
        stats.rederive_totals();
        Ok(stats)
    }

    /// Most recent entries first
    pub async fn get_usage_entries(&self, limit: Option<usize>) -> Result<Vec<UsageEntry>> {
        let entries = self.refresh().await?.entries;
        let limit = limit.unwrap_or(entries.len());
        Ok(entries.into_iter().rev().take(limit).collect())
    }

    pub async fn get_entries_for_date(&self, date: NaiveDate) -> Result<Vec<UsageEntry>> {
        let entries = self.refresh().await?.entries;
        Ok(self.entries_in_range(&entries, date, date))
    }

    pub async fn get_session_blocks(&self) -> Result<Vec<SessionBlock>> {
        self.get_session_blocks_at(Utc::now()).await
    }

    /// Session blocks evaluated at `now`, with gap blocks between sessions
    pub async fn get_session_blocks_at(&self, now: DateTime<Utc>) -> Result<Vec<SessionBlock>> {
        let entries = self.refresh().await?.entries;
        Ok(self.windower.timeline(&entries, now))
    }

    pub async fn get_active_session_block(&self) -> Result<Option<SessionBlock>> {
        self.get_active_session_block_at(Utc::now()).await
    }

    pub async fn get_active_session_block_at(&self, now: DateTime<Utc>) -> Result<Option<SessionBlock>> {
        let entries = self.refresh().await?.entries;
        let blocks = self.windower.build_blocks(&entries, now);
        Ok(SessionWindower::active_block(&blocks).cloned())
    }

    pub async fn get_auto_token_limit(&self) -> Result<Option<u64>> {
        self.get_auto_token_limit_at(Utc::now()).await
    }

    pub async fn get_auto_token_limit_at(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        let entries = self.refresh().await?.entries;
        let blocks = self.windower.build_blocks(&entries, now);
        Ok(SessionWindower::auto_token_limit(&blocks))
    }

    pub async fn get_today_stats(&self) -> Result<UsageStats> {
        self.get_today_stats_at(Utc::now()).await
    }

    /// Today's stats from only the files modified today.
    ///
    /// Bypasses the entry cache and uses its own deduplication set, so
    /// records already claimed by a full scan are still counted here.
    pub async fn get_today_stats_at(&self, now: DateTime<Utc>) -> Result<UsageStats> {
        let today = self.local_date(now);
        let cutoff = self.start_of_day(today);

        let mut guard = self.state.lock().await;
        let state = self.take_state(&mut guard);
        let root = self.root.clone();
        let parser = Arc::clone(&self.parser);
        let span = info_span!("today", scan_id = %new_scan_id());

        let result = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let mut state = state;
            let files: Vec<_> = state
                .catalog
                .discover(&root)
                .into_iter()
                .filter(|file| DateTime::<Utc>::from(file.modification_time) >= cutoff)
                .collect();
            debug!(files = files.len(), "Parsing files modified today");

            let entries = state.cache.parse_uncached(&files, &parser, &Deduplicator::new());
            (state, entries)
        })
        .await;

        let entries = match result {
            Ok((state, entries)) => {
                *guard = Some(state);
                entries
            }
            Err(e) => {
                *guard = Some(self.fresh_state());
                return Err(anyhow::Error::new(e).context("Today's usage scan did not complete"));
            }
        };
        drop(guard);

        let todays: Vec<UsageEntry> = self.entries_in_range(&entries, today, today);
        let session_count = Aggregator::count_sessions(&todays);
        Ok(self
            .aggregate(&entries, session_count)
            .filter_by_date_range(today, today))
    }

    /// Drop cached entries, frozen file records and every dedup key
    pub async fn clear_cache(&self) {
        let mut guard = self.state.lock().await;
        match guard.as_mut() {
            Some(state) => {
                state.catalog.clear_cache();
                state.cache.clear();
                state.dedup.clear();
            }
            None => *guard = Some(self.fresh_state()),
        }
        debug!("Cleared usage cache");
    }

    async fn refresh_locked(&self, guard: &mut Option<StoreState>) -> Result<LoadReport> {
        let state = self.take_state(guard);
        let root = self.root.clone();
        let parser = Arc::clone(&self.parser);
        let span = info_span!("refresh", scan_id = %new_scan_id());

        let result = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let mut state = state;
            let files = state.catalog.discover(&root);
            let report = state.cache.load(&files, &parser, &state.dedup);
            (state, report)
        })
        .await;

        match result {
            Ok((state, report)) => {
                *guard = Some(state);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Refresh task failed, resetting usage cache");
                *guard = Some(self.fresh_state());
                Err(anyhow::Error::new(e).context("Usage refresh did not complete"))
            }
        }
    }

    fn take_state(&self, guard: &mut Option<StoreState>) -> StoreState {
        guard.take().unwrap_or_else(|| self.fresh_state())
    }

    fn fresh_state(&self) -> StoreState {
        StoreState::new(&self.cache_config, &self.processing)
    }

    fn aggregate(&self, entries: &[UsageEntry], session_count: usize) -> UsageStats {
        match self.timezone {
            TimeZoneSetting::Local => Aggregator::aggregate_in(entries, session_count, &Local),
            TimeZoneSetting::Utc => Aggregator::aggregate_in(entries, session_count, &Utc),
        }
    }

    fn entries_in_range(&self, entries: &[UsageEntry], start: NaiveDate, end: NaiveDate) -> Vec<UsageEntry> {
        match self.timezone {
            TimeZoneSetting::Local => Aggregator::entries_in_range(entries, start, end, &Local)
                .cloned()
                .collect(),
            TimeZoneSetting::Utc => Aggregator::entries_in_range(entries, start, end, &Utc)
                .cloned()
                .collect(),
        }
    }

    fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        match self.timezone {
            TimeZoneSetting::Local => TimestampParser::local_date(ts, &Local),
            TimeZoneSetting::Utc => TimestampParser::local_date(ts, &Utc),
        }
    }

    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        match self.timezone {
            TimeZoneSetting::Local => TimestampParser::start_of_day(date, &Local),
            TimeZoneSetting::Utc => TimestampParser::start_of_day(date, &Utc),
        }
    }
}
