//! Event / conversation store adapters.
//!
//! Stores only hand out raw JSON records; [`load_corpus`] runs them through the
//! normalizer and applies an optional [`DateWindow`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::models::Corpus;
use super::normalizer::{normalize_corpus, NormalizeReport};
use crate::error::{Error, Result};
use crate::metrics;

const EVENTS_FILE: &str = "events.json";
const CONVERSATIONS_FILE: &str = "conversations.json";

/// Source of raw event records for a user.
pub trait EventStore: Send + Sync {
    fn load_events(&self, user_id: &str) -> Result<Vec<Value>>;
}

/// Source of raw conversation records for a user.
pub trait ConversationStore: Send + Sync {
    fn load_conversations(&self, user_id: &str) -> Result<Vec<Value>>;
}

/// File-backed store.
///
/// Layout:
/// ```text
/// <root>/<user>/schedule/events.json
/// <root>/<user>/history/<YYYY-MM-DD>/conversations.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        if !self.root.is_dir() {
            return Err(Error::Storage(format!(
                "data directory not found: {}",
                self.root.display()
            )));
        }
        if user_id.is_empty() || user_id.contains(['/', '\\']) || user_id == ".." {
            return Err(Error::InvalidArgument(format!("invalid user id: {:?}", user_id)));
        }
        Ok(self.root.join(user_id))
    }

    /// Read a JSON file holding either `{"<key>": [...]}` or a bare array.
    /// Unreadable or unparsable files yield no records.
    fn read_records(path: &Path, key: &str) -> Vec<Value> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unreadable record file: {}", err);
                return Vec::new();
            }
        };

        let parsed: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unparsable record file: {}", err);
                return Vec::new();
            }
        };

        match parsed {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove(key) {
                Some(Value::Array(items)) => items,
                _ => {
                    warn!(path = %path.display(), key, "Record file has no record list");
                    Vec::new()
                }
            },
            _ => {
                warn!(path = %path.display(), "Unexpected record file shape");
                Vec::new()
            }
        }
    }
}

impl EventStore for JsonDirStore {
    fn load_events(&self, user_id: &str) -> Result<Vec<Value>> {
        let path = self.user_dir(user_id)?.join("schedule").join(EVENTS_FILE);
        if !path.is_file() {
            warn!(user_id, path = %path.display(), "No schedule file for user");
            return Ok(Vec::new());
        }
        let records = Self::read_records(&path, "events");
        debug!(user_id, count = records.len(), "Loaded raw events");
        Ok(records)
    }
}

impl ConversationStore for JsonDirStore {
    fn load_conversations(&self, user_id: &str) -> Result<Vec<Value>> {
        let history = self.user_dir(user_id)?.join("history");
        if !history.is_dir() {
            warn!(user_id, path = %history.display(), "No conversation history for user");
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(&history)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(user_id, "Skipping unreadable history entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != CONVERSATIONS_FILE {
                continue;
            }

            // The date directory stands in for records without their own timestamp.
            let day = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
                .filter(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok())
                .map(str::to_string);

            for mut record in Self::read_records(entry.path(), "conversations") {
                if let (Some(day), Value::Object(obj)) = (&day, &mut record) {
                    let has_time = ["timestamp", "created_at", "time"]
                        .iter()
                        .any(|k| obj.get(*k).is_some_and(|v| !v.is_null()));
                    if !has_time {
                        obj.insert("timestamp".into(), Value::String(day.clone()));
                    }
                }
                records.push(record);
            }
        }

        debug!(user_id, count = records.len(), "Loaded raw conversations");
        Ok(records)
    }
}

/// In-memory store for embedding callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: HashMap<String, Vec<Value>>,
    conversations: HashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, user_id: &str, events: Vec<Value>) -> Self {
        self.events.entry(user_id.to_string()).or_default().extend(events);
        self
    }

    pub fn with_conversations(mut self, user_id: &str, conversations: Vec<Value>) -> Self {
        self.conversations
            .entry(user_id.to_string())
            .or_default()
            .extend(conversations);
        self
    }
}

impl EventStore for MemoryStore {
    fn load_events(&self, user_id: &str) -> Result<Vec<Value>> {
        Ok(self.events.get(user_id).cloned().unwrap_or_default())
    }
}

impl ConversationStore for MemoryStore {
    fn load_conversations(&self, user_id: &str) -> Result<Vec<Value>> {
        Ok(self.conversations.get(user_id).cloned().unwrap_or_default())
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidArgument(format!(
                "date window ends before it starts: {} > {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Monday to Sunday of the week before the one containing `today`.
    pub fn previous_week(today: NaiveDate) -> Self {
        let this_monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let start = this_monday - Duration::days(7);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Drop entities outside the window. Conversations are placed by their linked
    /// event's start, falling back to their own timestamp; undated ones are dropped.
    pub fn apply(&self, corpus: &mut Corpus) {
        corpus.events.retain(|e| self.contains(e.date()));
        corpus.conversations.retain(|turn| {
            turn.reference_time()
                .is_some_and(|t| self.contains(t.date_naive()))
        });
    }
}

/// Load and normalize a user's corpus from the given stores.
///
/// Only a missing data root or an invalid user id propagate; a user without
/// data yields an empty corpus.
pub fn load_corpus(
    events: &dyn EventStore,
    conversations: &dyn ConversationStore,
    user_id: &str,
    window: Option<DateWindow>,
) -> Result<(Corpus, NormalizeReport)> {
    let raw_events = events.load_events(user_id)?;
    let raw_conversations = conversations.load_conversations(user_id)?;

    let (mut corpus, report) = normalize_corpus(user_id, &raw_events, &raw_conversations);
    metrics::record_skipped_records("event", report.skipped_events);
    metrics::record_skipped_records("conversation", report.skipped_conversations);
    if report.skipped() > 0 {
        warn!(
            user_id,
            skipped_events = report.skipped_events,
            skipped_conversations = report.skipped_conversations,
            "Skipped malformed records"
        );
    }

    if let Some(window) = window {
        window.apply(&mut corpus);
        debug!(user_id, start = %window.start, end = %window.end, "Applied date window");
    }

    if corpus.is_empty() {
        let err = Error::MissingCorpusData(user_id.to_string());
        info!("{}; continuing with an empty corpus", err);
    }

    Ok((corpus, report))
}
