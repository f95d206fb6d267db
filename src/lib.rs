//! Usage Monitor Library
//!
//! Ingests Claude Code usage logs (one JSONL file per work session, grouped in
//! per-project directories) and turns them into cost and token statistics and
//! a live view of the current usage session.
//!
//! ## Core Features
//!
//! - **Incremental caching**: files are reparsed only when their modification
//!   time changes; files untouched since before today can be frozen entirely
//! - **Cross-file deduplication**: repeated `messageId:requestId` records are
//!   counted once
//! - **Tolerant parsing**: byte-level line scanning that skips lines cut short
//!   by a concurrent writer
//! - **Aggregation**: totals by model, day (with hourly cost) and project
//! - **Session windowing**: 5-hour blocks with burn rate, projection and an
//!   adaptive token limit
//!
//! ## Architecture Overview
//!
//! - [`catalog`] - Log file discovery and the immutability policy
//! - [`cache`] - Per-file entry cache and reparse strategies
//! - [`scanner`] - Zero-copy line splitting
//! - [`parser`] - JSONL records to [`UsageEntry`]
//! - [`dedup`] - Concurrent seen-key set
//! - [`pricing`] - Model family pricing
//! - [`aggregator`] - [`UsageStats`] reduction and date-range views
//! - [`monitor`] - [`SessionBlock`] segmentation
//! - [`store`] - [`UsageStore`], the query surface
//! - [`config`] - Configuration with file and environment overrides
//! - [`logging`] - Structured logging setup
//!
//! ## Main Entry Point
//!
//! ```no_run
//! use usage_monitor::{logging, Config, UsageStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let _guard = logging::init_logging(&config.logging, &config.paths.log_directory);
//!
//! let store = UsageStore::new(&config);
//! let today = store.get_today_stats().await?;
//! let limit = store.get_auto_token_limit().await?;
//! println!("today ${:.2}, limit {:?}", today.total_cost, limit);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod pricing;
pub mod scanner;
pub mod store;
pub mod timestamp_parser;

pub use aggregator::Aggregator;
pub use cache::{EntryCache, LoadReport, ParseStrategy};
pub use catalog::{FileCatalog, ImmutabilityPolicy};
pub use config::Config;
pub use dedup::Deduplicator;
pub use models::*;
pub use monitor::{SessionRules, SessionWindower};
pub use parser::{EntryParser, FileContext};
pub use pricing::{ModelPricing, PricingResolver};
pub use store::UsageStore;
