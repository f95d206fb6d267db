//! JSONL record parsing
//!
//! Turns the raw bytes of one log file into [`UsageEntry`] values. Lines pass
//! through a fixed sequence of checks and the first failing check drops the
//! line without affecting the rest of the file:
//!
//! 1. shape filter (`{` ... `}`), catching lines truncated by a live writer
//! 2. JSON decode into a tolerant record where every field is optional
//! 3. record type (anything explicitly typed other than `assistant` is skipped)
//! 4. timestamp parse
//! 5. token total check (zero or overflowing totals are dropped)
//! 6. cost resolution
//!
//! Deduplication runs after that, over whole files: [`EntryParser::parse_records`]
//! returns every valid record and the caller claims keys in a fixed file order.
//! Malformed and zero-usage records therefore never claim a dedup key.

use crate::catalog;
use crate::dedup::Deduplicator;
use crate::models::{FileMetadata, TokenCounts, UsageEntry};
use crate::pricing::PricingResolver;
use crate::scanner::{looks_like_object, LineScanner};
use crate::timestamp_parser::TimestampParser;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::trace;

const UNKNOWN_MODEL: &str = "unknown";

/// Per-file attributes stamped onto every entry parsed from that file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    /// Decoded project path
    pub project: String,
    pub source_file: PathBuf,
}

impl FileContext {
    pub fn new(project: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            source_file: source_file.into(),
        }
    }

    pub fn for_file(metadata: &FileMetadata) -> Self {
        Self::new(
            catalog::decode_project_dir(&metadata.project_dir),
            metadata.path.clone(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    #[serde(rename = "requestId", alias = "request_id")]
    request_id: Option<String>,
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
    #[serde(rename = "costUSD", alias = "cost_usd")]
    cost_usd: Option<f64>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_input_tokens: u64,
    cache_read_input_tokens: u64,
}

impl From<&RawUsage> for TokenCounts {
    fn from(usage: &RawUsage) -> Self {
        TokenCounts::new(
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_creation_input_tokens,
            usage.cache_read_input_tokens,
        )
    }
}

/// Parses usage log files into entries
#[derive(Debug, Clone, Default)]
pub struct EntryParser {
    pricing: PricingResolver,
}

impl EntryParser {
    pub fn new(pricing: PricingResolver) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingResolver {
        &self.pricing
    }

    /// Read and parse one file, dropping records whose key is already held
    pub fn parse_file(
        &self,
        path: &Path,
        context: &FileContext,
        dedup: &Deduplicator,
    ) -> Result<Vec<UsageEntry>> {
        let records = self.read_records(path, context)?;
        Ok(dedup.claim(records).0)
    }

    /// Read one file and return every valid record, duplicates included
    pub fn read_records(&self, path: &Path, context: &FileContext) -> Result<Vec<UsageEntry>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read usage log {}", path.display()))?;
        Ok(self.parse_records(&bytes, context))
    }

    /// Parse an in-memory file body. Never fails; unusable lines are dropped.
    pub fn parse_bytes(
        &self,
        bytes: &[u8],
        context: &FileContext,
        dedup: &Deduplicator,
    ) -> Vec<UsageEntry> {
        dedup.claim(self.parse_records(bytes, context)).0
    }

    /// Valid records of a file body in line order, without deduplication
    pub fn parse_records(&self, bytes: &[u8], context: &FileContext) -> Vec<UsageEntry> {
        let scanner = LineScanner::new(bytes);
        let mut entries = Vec::new();

        for (line_number, range) in LineScanner::new(bytes).enumerate() {
            let line = scanner.slice(range);
            if let Some(entry) = self.parse_line(line, line_number + 1, context) {
                entries.push(entry);
            }
        }

        entries
    }

    fn parse_line(
        &self,
        line: &[u8],
        line_number: usize,
        context: &FileContext,
    ) -> Option<UsageEntry> {
        if !looks_like_object(line) {
            trace!(file = %context.source_file.display(), line_number, "Skipping partial line");
            return None;
        }

        let record: RawRecord = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(e) => {
                trace!(file = %context.source_file.display(), line_number, error = %e, "Skipping undecodable line");
                return None;
            }
        };

        if matches!(record.record_type.as_deref(), Some(kind) if kind != "assistant") {
            return None;
        }

        let timestamp = match record.timestamp.as_deref().map(TimestampParser::parse) {
            Some(Ok(ts)) => ts,
            _ => {
                trace!(file = %context.source_file.display(), line_number, "Skipping line without usable timestamp");
                return None;
            }
        };

        let message = record.message?;
        let tokens = TokenCounts::from(message.usage.as_ref()?);
        match tokens.checked_total() {
            Some(0) => return None,
            Some(_) => {}
            None => {
                trace!(file = %context.source_file.display(), line_number, "Skipping line with overflowing token counts");
                return None;
            }
        }

        let model = message
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string());
        let cost = self.pricing.cost_for(&model, &tokens, record.cost_usd);

        Some(UsageEntry {
            timestamp,
            project: context.project.clone(),
            model,
            tokens,
            cost,
            source_file: context.source_file.clone(),
            message_id: message.id,
            request_id: record.request_id,
            session_id: record.session_id,
        })
    }
}
