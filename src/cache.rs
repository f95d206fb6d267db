//! Per-file entry cache
//!
//! Parsed entries are kept per file and reused while the file's modification
//! time is unchanged. Only new or changed ("dirty") files are parsed, with a
//! strategy chosen by how many there are:
//!
//! - **Sequential**: a handful of files, parsed on the calling thread
//! - **Parallel**: one fan-out over a bounded worker pool
//! - **Batched**: fixed-size batches one after another, each parallel
//!   internally, bounding open files and in-flight entries
//!
//! Without the `parallel` feature every strategy runs sequentially.
//!
//! Workers only parse. Dedup keys are claimed afterwards, in file path order,
//! and each cached file remembers the keys it dropped. When a key is released
//! (its file changed or vanished) the files that dropped it are reparsed in
//! the same load, so a warm cache counts what a cold scan would.

use crate::config::ProcessingConfig;
use crate::dedup::Deduplicator;
use crate::models::{CacheEntry, FileMetadata, UsageEntry};
use crate::parser::{EntryParser, FileContext};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Sequential,
    Parallel { workers: usize },
    Batched { workers: usize, batch_size: usize },
}

impl ParseStrategy {
    pub fn select(dirty_count: usize, config: &ProcessingConfig) -> Self {
        if dirty_count <= config.sequential_threshold {
            return Self::Sequential;
        }

        let workers = worker_count(config);
        if workers <= 1 {
            Self::Sequential
        } else if dirty_count <= config.batch_threshold {
            Self::Parallel { workers }
        } else {
            Self::Batched {
                workers,
                batch_size: config.batch_size.max(1),
            }
        }
    }
}

/// Available parallelism, capped by `max_workers` when set
fn worker_count(config: &ProcessingConfig) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    match config.max_workers {
        0 => available,
        max => available.min(max),
    }
}

/// Outcome of one cache load
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Entries of all loaded files, ordered by timestamp
    pub entries: Vec<UsageEntry>,
    pub cache_hits: usize,
    pub parsed_files: usize,
    pub failed_files: usize,
}

/// Every valid record of one file, before deduplication
struct ParseOutcome {
    path: PathBuf,
    modification_time: SystemTime,
    result: Result<Vec<UsageEntry>>,
}

/// Kept entries and dropped keys of one file
struct ClaimedOutcome {
    path: PathBuf,
    modification_time: SystemTime,
    result: Result<(Vec<UsageEntry>, Vec<String>)>,
}

pub struct EntryCache {
    files: HashMap<PathBuf, CacheEntry>,
    processing: ProcessingConfig,
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new(ProcessingConfig::default())
    }
}

impl EntryCache {
    pub fn new(processing: ProcessingConfig) -> Self {
        Self {
            files: HashMap::new(),
            processing,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Split into (cache hits, dirty files)
    pub fn partition<'a>(
        &self,
        files: &'a [FileMetadata],
    ) -> (Vec<&'a FileMetadata>, Vec<&'a FileMetadata>) {
        files.iter().partition(|file| {
            self.files
                .get(&file.path)
                .is_some_and(|cached| cached.is_valid_for(file.modification_time))
        })
    }

    /// Bring the cache in line with `files` and return the merged entries
    pub fn load(
        &mut self,
        files: &[FileMetadata],
        parser: &EntryParser,
        dedup: &Deduplicator,
    ) -> LoadReport {
        let mut released = self.prune(files, dedup);

        // A changed file reclaims the keys its previous version held
        for file in files {
            let changed = self
                .files
                .get(&file.path)
                .is_some_and(|cached| !cached.is_valid_for(file.modification_time));
            if changed {
                if let Some(stale) = self.files.remove(&file.path) {
                    released.extend(release_keys(&stale.entries, dedup));
                }
            }
        }

        let evicted = self.evict_dropped_holders(released, dedup);
        if evicted > 0 {
            debug!(evicted, "Reparsing files that dropped a released key");
        }

        let (hits, dirty) = self.partition(files);
        let cache_hits = hits.len();

        let strategy = ParseStrategy::select(dirty.len(), &self.processing);
        debug!(
            dirty = dirty.len(),
            cache_hits,
            strategy = ?strategy,
            "Selected parse strategy"
        );

        let mut parsed_files = 0;
        let mut failed_files = 0;
        for outcome in claim_in_path_order(run_strategy(strategy, &dirty, parser), dedup) {
            match outcome.result {
                Ok((entries, dropped_keys)) => {
                    parsed_files += 1;
                    self.files.insert(
                        outcome.path,
                        CacheEntry {
                            modification_time: outcome.modification_time,
                            entries,
                            dropped_keys,
                        },
                    );
                }
                Err(e) => {
                    failed_files += 1;
                    warn!(file = %outcome.path.display(), error = %e, "Skipping unreadable usage log");
                }
            }
        }

        let mut entries: Vec<UsageEntry> = files
            .iter()
            .filter_map(|file| self.files.get(&file.path))
            .flat_map(|cached| cached.entries.iter().cloned())
            .collect();
        sort_entries(&mut entries);

        info!(
            files = files.len(),
            cache_hits,
            parsed_files,
            failed_files,
            entries = entries.len(),
            "Loaded usage entries"
        );

        LoadReport {
            entries,
            cache_hits,
            parsed_files,
            failed_files,
        }
    }

    /// Parse `files` without consulting or updating the cache
    pub fn parse_uncached(
        &self,
        files: &[FileMetadata],
        parser: &EntryParser,
        dedup: &Deduplicator,
    ) -> Vec<UsageEntry> {
        let refs: Vec<&FileMetadata> = files.iter().collect();
        let strategy = ParseStrategy::select(refs.len(), &self.processing);

        let mut entries: Vec<UsageEntry> =
            claim_in_path_order(run_strategy(strategy, &refs, parser), dedup)
                .into_iter()
                .filter_map(|outcome| match outcome.result {
                    Ok((entries, _)) => Some(entries),
                    Err(e) => {
                        warn!(file = %outcome.path.display(), error = %e, "Skipping unreadable usage log");
                        None
                    }
                })
                .flatten()
                .collect();
        sort_entries(&mut entries);
        entries
    }

    /// Drop files no longer present on disk and return the keys they held
    fn prune(&mut self, files: &[FileMetadata], dedup: &Deduplicator) -> Vec<String> {
        let present: HashSet<&PathBuf> = files.iter().map(|f| &f.path).collect();
        let vanished: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|path| !present.contains(path))
            .cloned()
            .collect();

        let mut released = Vec::new();
        for path in vanished {
            if let Some(stale) = self.files.remove(&path) {
                debug!(file = %path.display(), "Pruning vanished file from cache");
                released.extend(release_keys(&stale.entries, dedup));
            }
        }
        released
    }

    /// Evict cached files that dropped one of `released` as a duplicate, so
    /// this load reparses them and they can claim it. Their own keys are
    /// released in turn. Returns the number of evicted files.
    fn evict_dropped_holders(&mut self, mut released: Vec<String>, dedup: &Deduplicator) -> usize {
        let mut evicted = 0;
        while !released.is_empty() {
            let keys: HashSet<String> = released.drain(..).collect();
            let holders: Vec<PathBuf> = self
                .files
                .iter()
                .filter(|(_, cached)| cached.dropped_keys.iter().any(|key| keys.contains(key)))
                .map(|(path, _)| path.clone())
                .collect();

            for path in holders {
                if let Some(stale) = self.files.remove(&path) {
                    evicted += 1;
                    released.extend(release_keys(&stale.entries, dedup));
                }
            }
        }
        evicted
    }
}

fn release_keys(entries: &[UsageEntry], dedup: &Deduplicator) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| Deduplicator::key(entry.message_id.as_deref(), entry.request_id.as_deref()))
        .inspect(|key| dedup.release_key(key))
        .collect()
}

/// Claim dedup keys file by file in path order, then line order, so the
/// file that keeps a shared record does not depend on worker scheduling
fn claim_in_path_order(mut outcomes: Vec<ParseOutcome>, dedup: &Deduplicator) -> Vec<ClaimedOutcome> {
    outcomes.sort_by(|a, b| a.path.cmp(&b.path));
    outcomes
        .into_iter()
        .map(|outcome| ClaimedOutcome {
            path: outcome.path,
            modification_time: outcome.modification_time,
            result: outcome.result.map(|records| dedup.claim(records)),
        })
        .collect()
}

/// Chronological, then by file and message id for a stable order
pub fn sort_entries(entries: &mut [UsageEntry]) {
    entries.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.source_file.cmp(&b.source_file))
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}

fn parse_one(file: &FileMetadata, parser: &EntryParser) -> ParseOutcome {
    let context = FileContext::for_file(file);
    ParseOutcome {
        path: file.path.clone(),
        modification_time: file.modification_time,
        result: parser.read_records(&file.path, &context),
    }
}

fn parse_sequential(files: &[&FileMetadata], parser: &EntryParser) -> Vec<ParseOutcome> {
    files.iter().map(|file| parse_one(file, parser)).collect()
}

#[cfg(feature = "parallel")]
fn run_strategy(
    strategy: ParseStrategy,
    files: &[&FileMetadata],
    parser: &EntryParser,
) -> Vec<ParseOutcome> {
    let (workers, batch_size) = match strategy {
        ParseStrategy::Sequential => return parse_sequential(files, parser),
        ParseStrategy::Parallel { workers } => (workers, files.len().max(1)),
        ParseStrategy::Batched {
            workers,
            batch_size,
        } => (workers, batch_size),
    };

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "Failed to build parse worker pool, parsing sequentially");
            return parse_sequential(files, parser);
        }
    };

    let mut outcomes = Vec::with_capacity(files.len());
    for (index, batch) in files.chunks(batch_size).enumerate() {
        debug!(batch = index, files = batch.len(), workers, "Parsing batch");
        let batch_outcomes: Vec<ParseOutcome> = pool.install(|| {
            batch
                .par_iter()
                .map(|file| parse_one(file, parser))
                .collect()
        });
        outcomes.extend(batch_outcomes);
    }
    outcomes
}

#[cfg(not(feature = "parallel"))]
fn run_strategy(
    _strategy: ParseStrategy,
    files: &[&FileMetadata],
    parser: &EntryParser,
) -> Vec<ParseOutcome> {
    parse_sequential(files, parser)
}
