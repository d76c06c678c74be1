use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{next_entry_id, DiaryEntry, Mood};

/// A standalone mood check-in, recorded without writing an entry.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodSample {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub mood: Mood,
    #[serde(default)]
    pub note: Option<String>,
}

impl MoodSample {
    pub fn new(mood: Mood, note: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        let note = note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Self {
            id: next_entry_id(now),
            date: now,
            mood,
            note,
        }
    }

    /// Projects an entry's mood into the sample series so trends cover both
    /// recording paths. Entries without a mood yield nothing.
    pub fn from_entry(entry: &DiaryEntry) -> Option<Self> {
        let mood = entry.mood?;
        Some(Self {
            id: format!("entry-{}", entry.id),
            date: entry.date,
            mood,
            note: None,
        })
    }
}
