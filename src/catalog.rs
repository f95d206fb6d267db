//! Log file discovery
//!
//! Walks `<root>/<project-dir>/*.jsonl` and produces one [`FileMetadata`] per
//! session log. Project directories encode the original project path with
//! dashes in place of path separators.

use crate::config::CacheConfig;
use crate::models::FileMetadata;
use crate::timestamp_parser::TimestampParser;
use chrono::{DateTime, Utc};
use glob::{glob, Pattern};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Decides which files are assumed never to change again.
///
/// A file whose modification time lies before the start of the current day is
/// frozen: later discovery passes reuse its metadata without a `stat` call. If
/// such a file is edited anyway the edit is missed until the catalog's cache
/// is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmutabilityPolicy {
    enabled: bool,
}

impl ImmutabilityPolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_frozen(&self, modification_time: SystemTime, cutoff: DateTime<Utc>) -> bool {
        self.enabled && DateTime::<Utc>::from(modification_time) < cutoff
    }
}

pub struct FileCatalog {
    skip_patterns: Vec<String>,
    policy: ImmutabilityPolicy,
    frozen: HashMap<PathBuf, FileMetadata>,
}

impl Default for FileCatalog {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl FileCatalog {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            skip_patterns: config.skip_patterns.clone(),
            policy: ImmutabilityPolicy::new(config.freeze_before_today),
            frozen: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: ImmutabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ImmutabilityPolicy {
        self.policy
    }

    /// Number of files currently exempt from re-stat'ing
    pub fn frozen_count(&self) -> usize {
        self.frozen.len()
    }

    pub fn clear_cache(&mut self) {
        self.frozen.clear();
    }

    /// All log files under `root`, oldest first
    pub fn discover(&mut self, root: &Path) -> Vec<FileMetadata> {
        self.discover_at(root, TimestampParser::start_of_today())
    }

    /// Discovery with an explicit freeze cutoff
    pub fn discover_at(&mut self, root: &Path, freeze_cutoff: DateTime<Utc>) -> Vec<FileMetadata> {
        let project_dirs = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                if root.exists() {
                    warn!(root = %root.display(), error = %e, "Cannot list projects directory");
                } else {
                    debug!(root = %root.display(), "Projects directory does not exist");
                }
                self.frozen.clear();
                return Vec::new();
            }
        };

        let mut files = Vec::new();
        let mut seen_frozen = HashMap::new();

        for dir_entry in project_dirs {
            let dir_entry = match dir_entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            let project_dir = dir_entry.file_name().to_string_lossy().into_owned();
            if self.should_skip_dir(&project_dir) {
                debug!(project_dir = %project_dir, "Skipping hidden or sandbox directory");
                continue;
            }

            let dir_path = dir_entry.path();
            if !dir_path.is_dir() {
                continue;
            }

            let pattern = format!("{}/*.jsonl", Pattern::escape(&dir_path.to_string_lossy()));
            let paths = match glob(&pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(project_dir = %project_dir, error = %e, "Invalid glob pattern for project directory");
                    continue;
                }
            };

            for path in paths {
                let path = match path {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(project_dir = %project_dir, error = %e, "Skipping unreadable path");
                        continue;
                    }
                };

                if let Some(frozen) = self.frozen.remove(&path) {
                    seen_frozen.insert(path, frozen.clone());
                    files.push(frozen);
                    continue;
                }

                let Some(metadata) = stat_file(&path, &project_dir) else {
                    continue;
                };

                if self.policy.is_frozen(metadata.modification_time, freeze_cutoff) {
                    seen_frozen.insert(path, metadata.clone());
                }
                files.push(metadata);
            }
        }

        // Frozen records for files that disappeared are dropped here
        self.frozen = seen_frozen;

        files.sort_by(|a, b| {
            a.earliest_timestamp
                .cmp(&b.earliest_timestamp)
                .then_with(|| a.path.cmp(&b.path))
        });

        debug!(
            files = files.len(),
            frozen = self.frozen.len(),
            "Discovered usage log files"
        );
        files
    }

    fn should_skip_dir(&self, name: &str) -> bool {
        name.starts_with('.') || self.skip_patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

fn stat_file(path: &Path, project_dir: &str) -> Option<FileMetadata> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Cannot stat usage log");
            return None;
        }
    };

    if !metadata.is_file() {
        return None;
    }

    let modification_time = match metadata.modified() {
        Ok(mtime) => mtime,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "No modification time for usage log");
            return None;
        }
    };

    Some(FileMetadata {
        path: path.to_path_buf(),
        project_dir: project_dir.to_string(),
        earliest_timestamp: DateTime::<Utc>::from(modification_time),
        modification_time,
    })
}

/// Turn an encoded directory name back into the project path.
/// `-Users-me-code-app` becomes `/Users/me/code/app`.
pub fn decode_project_dir(name: &str) -> String {
    name.replace('-', "/")
}

/// Last component of a decoded project path
pub fn project_display_name(project: &str) -> String {
    project
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(project)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, mtime: SystemTime) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    fn hours_ago(hours: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(hours * 3600)
    }

    #[test]
    fn test_decode_project_dir() {
        assert_eq!(decode_project_dir("-Users-me-code-app"), "/Users/me/code/app");
        assert_eq!(project_display_name("/Users/me/code/app"), "app");
        assert_eq!(project_display_name("/"), "/");
        assert_eq!(project_display_name("plain"), "plain");
    }

    #[test]
    fn test_discovers_sorted_by_mtime() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("-a/new.jsonl"), hours_ago(1));
        touch(&root.path().join("-b/old.jsonl"), hours_ago(10));
        touch(&root.path().join("-b/notes.txt"), hours_ago(5));

        let mut catalog = FileCatalog::default().with_policy(ImmutabilityPolicy::disabled());
        let files = catalog.discover(root.path());

        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["old.jsonl", "new.jsonl"]);
        assert_eq!(files[0].project_dir, "-b");
    }

    #[test]
    fn test_skips_hidden_and_sandbox_dirs() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join(".hidden/a.jsonl"), hours_ago(1));
        touch(&root.path().join("-private-var-folders-xy/a.jsonl"), hours_ago(1));
        touch(&root.path().join("-Users-me-tmp-scratch/a.jsonl"), hours_ago(1));
        touch(&root.path().join("-Users-me-app/a.jsonl"), hours_ago(1));

        let mut catalog = FileCatalog::default();
        let files = catalog.discover(root.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].project_dir, "-Users-me-app");
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = TempDir::new().unwrap();
        let mut catalog = FileCatalog::default();
        assert!(catalog.discover(&root.path().join("nope")).is_empty());
    }

    #[test]
    fn test_frozen_files_are_not_restated() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("-p/old.jsonl");
        let original = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        touch(&path, original);

        let cutoff = DateTime::<Utc>::from(original + Duration::from_secs(3600));
        let mut catalog = FileCatalog::default();
        let first = catalog.discover_at(root.path(), cutoff);
        assert_eq!(catalog.frozen_count(), 1);

        // An edit after freezing goes unnoticed
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(original + Duration::from_secs(60))
            .unwrap();
        let second = catalog.discover_at(root.path(), cutoff);
        assert_eq!(first, second);

        catalog.clear_cache();
        let third = catalog.discover_at(root.path(), cutoff);
        assert_eq!(third[0].modification_time, original + Duration::from_secs(60));
    }

    #[test]
    fn test_recent_files_are_restated() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("-p/today.jsonl");
        touch(&path, hours_ago(0));

        let mut catalog = FileCatalog::default();
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        catalog.discover_at(root.path(), cutoff);
        assert_eq!(catalog.frozen_count(), 0);
    }

    #[test]
    fn test_vanished_frozen_file_is_dropped() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("-p/old.jsonl");
        touch(&path, hours_ago(48));

        let mut catalog = FileCatalog::default();
        let cutoff = Utc::now();
        assert_eq!(catalog.discover_at(root.path(), cutoff).len(), 1);
        fs::remove_file(&path).unwrap();
        assert!(catalog.discover_at(root.path(), cutoff).is_empty());
        assert_eq!(catalog.frozen_count(), 0);
    }
}
