//! Saved sessions, newest first, stored as a single JSON array.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::grounding::{GroundingData, GroundingSession, SenseType};
use crate::mood;
use crate::storage::{LocalStore, StoreError, JOURNAL_KEY};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: GroundingData,
    pub pre_mood: f64,
    pub post_mood: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl JournalEntry {
    pub fn from_session(session: &GroundingSession, id: String, timestamp: i64) -> Self {
        Self {
            id,
            timestamp,
            data: session.data.clone(),
            pre_mood: session.pre_mood,
            post_mood: session.post_mood,
            image_url: session.generated_image.clone(),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn pre_normalized(&self) -> f64 {
        mood::normalize(self.pre_mood)
    }

    pub fn post_normalized(&self) -> f64 {
        mood::normalize(self.post_mood)
    }

    pub fn improvement(&self) -> f64 {
        mood::improvement(self.pre_mood, self.post_mood)
    }

    pub fn is_positive(&self) -> bool {
        self.improvement() > 0.0
    }

    pub fn export_file_name(&self) -> String {
        export_file_name(self.timestamp)
    }

    pub fn summary(&self) -> JournalSummary {
        JournalSummary {
            id: self.id.clone(),
            date_label: format_date(self.timestamp, "%a, %b %-d"),
            improvement_badge: mood::improvement_badge(self.improvement()),
            pre_magnitude: mood::to_magnitude(self.pre_mood),
            post_magnitude: mood::to_magnitude(self.post_mood),
            has_image: self.image_url.is_some(),
        }
    }

    pub fn detail(&self) -> JournalDetail {
        JournalDetail {
            date_label: format_date(self.timestamp, "%Y-%m-%d"),
            time_label: format_date(self.timestamp, "%H:%M"),
            senses: self
                .data
                .answered()
                .map(|(sense, text)| (sense, text.to_string()))
                .collect(),
            pre_label: mood::to_label(self.pre_mood),
            post_label: mood::to_label(self.post_mood),
            has_image: self.image_url.is_some(),
        }
    }
}

/// One row of the journal list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JournalSummary {
    pub id: String,
    pub date_label: String,
    pub improvement_badge: Option<String>,
    pub pre_magnitude: String,
    pub post_magnitude: String,
    pub has_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalDetail {
    pub date_label: String,
    pub time_label: String,
    pub senses: Vec<(SenseType, String)>,
    pub pre_label: String,
    pub post_label: String,
    pub has_image: bool,
}

pub fn export_file_name(timestamp_ms: i64) -> String {
    format!("grounding-{timestamp_ms}.png")
}

fn format_date(timestamp_ms: i64, pattern: &str) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(moment) => moment.format(pattern).to_string(),
        None => "unknown date".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct JournalStore {
    store: LocalStore,
}

impl JournalStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Entries in stored order. A missing or unparsable blob reads as empty;
    /// a blob that cannot be read at all is an error.
    pub fn read_entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let Some(contents) = self.store.read(JOURNAL_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<JournalEntry>>(&contents) {
            Ok(entries) => Ok(entries),
            Err(error) => {
                warn!(%error, "stored journal unparsable; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Like `read_entries`, but an unreadable blob is logged and shown as empty.
    pub fn load(&self) -> Vec<JournalEntry> {
        self.read_entries().unwrap_or_else(|error| {
            warn!(%error, "journal unreadable");
            Vec::new()
        })
    }

    /// Prepends `entry` and rewrites the whole list. Refuses to write when
    /// the existing blob cannot be read.
    pub fn append(&self, entry: JournalEntry) -> Result<Vec<JournalEntry>, StoreError> {
        let mut entries = self.read_entries()?;
        entries.insert(0, entry);
        let contents = serde_json::to_string(&entries)?;
        self.store.write(JOURNAL_KEY, &contents)?;
        info!(entries = entries.len(), id = %entries[0].id, "journal entry saved");
        Ok(entries)
    }

    pub fn find(&self, id: &str) -> Option<JournalEntry> {
        self.load().into_iter().find(|entry| entry.id == id)
    }
}
