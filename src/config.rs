//! Configuration system
//!
//! Provides configuration management with:
//! - Runtime defaults
//! - Config file loading (optional, `basic` feature)
//! - Environment variable overrides
//! - Validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Longest accepted session window
pub const MAX_SESSION_HOURS: i64 = 24;

/// Longest accepted gap or activity threshold (one week)
pub const MAX_THRESHOLD_MINUTES: i64 = 7 * 24 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Reparse strategy thresholds
    pub processing: ProcessingConfig,

    /// Session windowing rules
    pub session: SessionConfig,

    /// File cache policy
    pub cache: CacheConfig,

    /// Date bucketing for aggregation
    pub reporting: ReportingConfig,

    /// Paths configuration
    pub paths: PathsConfig,

    /// Per-family price overrides
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Dirty files at or below this count are parsed on the calling thread.
    pub sequential_threshold: usize,
    /// Dirty files above this count are parsed in fixed-size batches.
    pub batch_threshold: usize,
    /// Files per batch once `batch_threshold` is exceeded.
    pub batch_size: usize,
    /// Upper bound on parse workers; 0 means available parallelism.
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Window length, at most [`MAX_SESSION_HOURS`].
    pub duration_hours: i64,
    /// Idle time after which the next entry opens a new block.
    ///
    /// Only splits a block when it is shorter than the window. The default
    /// equals the 5h window, so by default blocks close on the window alone;
    /// set e.g. 30 to also split on idle stretches.
    pub gap_minutes: i64,
    /// A block stays active while its last entry is younger than this.
    pub activity_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Treat files last modified before today as immutable and stop
    /// re-stat'ing them. Edits to such files go unnoticed until `clear_cache`.
    pub freeze_before_today: bool,
    /// Directory-name fragments that mark sandbox/temporary projects.
    pub skip_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub timezone: TimeZoneSetting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneSetting {
    #[default]
    Local,
    Utc,
}

impl FromStr for TimeZoneSetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "utc" => Ok(Self::Utc),
            other => Err(anyhow::anyhow!("Unknown timezone setting: {other}")),
        }
    }
}

impl fmt::Display for TimeZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Utc => f.write_str("utc"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root holding the `projects/` directory.
    pub data_dir: PathBuf,
    pub log_directory: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Model-family substring -> rates in USD per million tokens.
    pub overrides: BTreeMap<String, PriceOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_write_per_million: f64,
    pub cache_read_per_million: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sequential_threshold: 5,
            batch_threshold: 500,
            batch_size: 100,
            max_workers: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_hours: 5,
            gap_minutes: 5 * 60,
            activity_minutes: 5 * 60,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freeze_before_today: true,
            skip_patterns: vec![
                "-private-var-folders-".to_string(),
                "-var-folders-".to_string(),
                "-tmp-".to_string(),
            ],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_directory: PathBuf::from("logs"),
        }
    }
}

/// `CLAUDE_CONFIG_DIR`, falling back to `~/.claude`
fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("CLAUDE_CONFIG_DIR") {
        let dir = dir.trim();
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

impl PathsConfig {
    /// Directory containing one subdirectory per project
    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }
}

impl Config {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        #[cfg(feature = "basic")]
        {
            let config_paths = [
                PathBuf::from("usage-monitor.toml"),
                PathBuf::from(".usage-monitor.toml"),
                dirs::config_dir()
                    .map(|d| d.join("usage-monitor").join("config.toml"))
                    .unwrap_or_default(),
            ];

            for path in &config_paths {
                if path.is_file() {
                    info!(config_file = %path.display(), "Loading configuration from file");
                    config = Self::load_from_file(path)?;
                    break;
                }
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    #[cfg(feature = "basic")]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("USAGE_MONITOR_SEQUENTIAL_THRESHOLD") {
            self.processing.sequential_threshold = val
                .parse()
                .context("Invalid USAGE_MONITOR_SEQUENTIAL_THRESHOLD")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_BATCH_THRESHOLD") {
            self.processing.batch_threshold =
                val.parse().context("Invalid USAGE_MONITOR_BATCH_THRESHOLD")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_BATCH_SIZE") {
            self.processing.batch_size = val.parse().context("Invalid USAGE_MONITOR_BATCH_SIZE")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_MAX_WORKERS") {
            self.processing.max_workers =
                val.parse().context("Invalid USAGE_MONITOR_MAX_WORKERS")?;
        }

        if let Ok(val) = env::var("USAGE_MONITOR_SESSION_HOURS") {
            self.session.duration_hours =
                val.parse().context("Invalid USAGE_MONITOR_SESSION_HOURS")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_GAP_MINUTES") {
            self.session.gap_minutes = val.parse().context("Invalid USAGE_MONITOR_GAP_MINUTES")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_ACTIVITY_MINUTES") {
            self.session.activity_minutes =
                val.parse().context("Invalid USAGE_MONITOR_ACTIVITY_MINUTES")?;
        }

        if let Ok(val) = env::var("USAGE_MONITOR_FREEZE_BEFORE_TODAY") {
            self.cache.freeze_before_today = val
                .parse()
                .context("Invalid USAGE_MONITOR_FREEZE_BEFORE_TODAY")?;
        }
        if let Ok(val) = env::var("USAGE_MONITOR_TIMEZONE") {
            self.reporting.timezone = val.parse().context("Invalid USAGE_MONITOR_TIMEZONE")?;
        }

        if let Ok(val) = env::var("CLAUDE_CONFIG_DIR") {
            if !val.trim().is_empty() {
                self.paths.data_dir = PathBuf::from(val.trim());
            }
        }
        if let Ok(val) = env::var("USAGE_MONITOR_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.processing.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if self.processing.batch_threshold < self.processing.sequential_threshold {
            return Err(anyhow::anyhow!(
                "Batch threshold ({}) must not be below the sequential threshold ({})",
                self.processing.batch_threshold,
                self.processing.sequential_threshold
            ));
        }

        if self.session.duration_hours <= 0 {
            return Err(anyhow::anyhow!(
                "Session duration must be positive, got {}h",
                self.session.duration_hours
            ));
        }

        if self.session.duration_hours > MAX_SESSION_HOURS {
            return Err(anyhow::anyhow!(
                "Session duration must be at most {MAX_SESSION_HOURS}h, got {}h",
                self.session.duration_hours
            ));
        }

        if self.session.gap_minutes <= 0 || self.session.activity_minutes <= 0 {
            return Err(anyhow::anyhow!(
                "Gap and activity thresholds must be positive"
            ));
        }

        if self.session.gap_minutes > MAX_THRESHOLD_MINUTES
            || self.session.activity_minutes > MAX_THRESHOLD_MINUTES
        {
            return Err(anyhow::anyhow!(
                "Gap and activity thresholds must be at most {MAX_THRESHOLD_MINUTES} minutes"
            ));
        }

        if self.session.gap_minutes > self.session.duration_hours * 60 {
            warn!(
                gap_minutes = self.session.gap_minutes,
                duration_hours = self.session.duration_hours,
                "Gap threshold exceeds session duration and will never split a block"
            );
        }

        for (family, rates) in &self.pricing.overrides {
            let all = [
                rates.input_per_million,
                rates.output_per_million,
                rates.cache_write_per_million,
                rates.cache_read_per_million,
            ];
            if all.iter().any(|r| !r.is_finite() || *r < 0.0) {
                return Err(anyhow::anyhow!(
                    "Price override for '{family}' contains a negative or non-finite rate"
                ));
            }
        }

        Ok(())
    }

    /// Save current configuration to file
    #[cfg(feature = "basic")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}
