#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use usage_monitor::config::{Config, TimeZoneSetting};

/// A temporary `projects/` tree of session logs
pub struct LogFixture {
    dir: TempDir,
}

impl LogFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("projects")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("projects")
    }

    /// Write a session log, replacing any previous content
    pub fn write_session(&self, project_dir: &str, file_name: &str, lines: &[String]) -> PathBuf {
        let path = self.root().join(project_dir).join(file_name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    pub fn append(&self, path: &Path, line: &str) {
        let mut file = fs::OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "{line}").unwrap();
    }
}

pub fn set_mtime(path: &Path, mtime: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

/// Config with UTC day buckets and no freezing, so tests are independent of
/// the machine's zone and clock
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.reporting.timezone = TimeZoneSetting::Utc;
    config.cache.freeze_before_today = false;
    config
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// One assistant record in the on-disk log format
pub fn assistant_line(
    timestamp: DateTime<Utc>,
    message_id: Option<&str>,
    request_id: Option<&str>,
    cost: Option<f64>,
    input_tokens: u64,
    output_tokens: u64,
) -> String {
    let mut record = json!({
        "timestamp": timestamp.to_rfc3339(),
        "type": "assistant",
        "message": {
            "model": "claude-sonnet-4-20250514",
            "usage": {
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 0
            }
        }
    });

    if let Some(id) = message_id {
        record["message"]["id"] = json!(id);
    }
    if let Some(id) = request_id {
        record["requestId"] = json!(id);
    }
    if let Some(cost) = cost {
        record["costUSD"] = json!(cost);
    }

    record.to_string()
}

/// Shorthand for a record with both ids and an explicit cost
pub fn priced_line(timestamp: &str, id: &str, cost: f64) -> String {
    assistant_line(
        ts(timestamp),
        Some(&format!("msg_{id}")),
        Some(&format!("req_{id}")),
        Some(cost),
        100,
        50,
    )
}
