//! Deduplication Engine
//!
//! The same assistant message can be logged more than once, across resumed
//! sessions or copied files. Records are identified by the composite
//! `messageId:requestId` key; the first sighting is counted and later ones are
//! dropped.
//!
//! ## Rules
//!
//! - A record missing either id is never deduplicated. The ids are optional
//!   metadata, not a structural requirement.
//! - The seen-set is a [`DashSet`], so the check-and-insert is atomic and safe
//!   to call from parallel parse workers.
//! - Cached files remember the keys they dropped, so releasing a key lets the
//!   cache find the files that can now claim it.
//! - Independent queries that must see records again (the "today" fast path)
//!   use their own fresh instance.

use crate::models::UsageEntry;
use dashmap::DashSet;
use tracing::trace;

pub struct Deduplicator {
    seen: DashSet<String>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Composite key, or `None` when the record is exempt from deduplication
    pub fn key(message_id: Option<&str>, request_id: Option<&str>) -> Option<String> {
        match (message_id, request_id) {
            (Some(mid), Some(rid)) if !mid.is_empty() && !rid.is_empty() => {
                Some(format!("{}:{}", mid, rid))
            }
            _ => None,
        }
    }

    /// True on the first sighting of a key, and for every record without one
    pub fn should_include(&self, message_id: Option<&str>, request_id: Option<&str>) -> bool {
        match Self::key(message_id, request_id) {
            Some(key) => self.seen.insert(key),
            None => true,
        }
    }

    /// Keep the entries that claim their key, in order. Also returns the keys
    /// of the entries dropped because the key was already held.
    pub fn claim(&self, entries: Vec<UsageEntry>) -> (Vec<UsageEntry>, Vec<String>) {
        let mut dropped = Vec::new();
        let kept = entries
            .into_iter()
            .filter(|entry| {
                let Some(key) = Self::key(entry.message_id.as_deref(), entry.request_id.as_deref())
                else {
                    return true;
                };
                if self.seen.insert(key.clone()) {
                    return true;
                }
                trace!(file = %entry.source_file.display(), key = %key, "Dropping duplicate record");
                dropped.push(key);
                false
            })
            .collect();
        (kept, dropped)
    }

    /// Forget a key so the record can be claimed again, e.g. by a reparse of
    /// the file that originally contributed it
    pub fn release(&self, message_id: Option<&str>, request_id: Option<&str>) {
        if let Some(key) = Self::key(message_id, request_id) {
            self.release_key(&key);
        }
    }

    pub fn release_key(&self, key: &str) {
        self.seen.remove(key);
    }

    pub fn clear(&self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
