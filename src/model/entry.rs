use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{BookId, Mood};

pub type EntryId = String;

static LAST_ISSUED_ID: Lazy<Mutex<i128>> = Lazy::new(|| Mutex::new(0));

/// Issues a millisecond-timestamp id. Ids handed out within the same
/// millisecond are bumped so they stay unique and increasing.
pub fn next_entry_id(now: OffsetDateTime) -> EntryId {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let mut last = LAST_ISSUED_ID.lock();
    let id = if millis <= *last { *last + 1 } else { millis };
    *last = id;
    id.to_string()
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: EntryId,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mood: Option<Mood>,
    #[serde(default, rename = "bookId")]
    pub book_id: Option<BookId>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl DiaryEntry {
    pub fn new(book_id: Option<BookId>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: next_entry_id(now),
            date: now,
            content: String::new(),
            mood: None,
            book_id,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_mood(mut self, mood: Option<Mood>) -> Self {
        self.mood = mood;
        self
    }

    pub fn belongs_to(&self, book_id: &str) -> bool {
        self.book_id.as_deref() == Some(book_id)
    }

    /// Marks the entry as freshly stored, keeping the original creation stamp
    /// when there is one.
    pub(crate) fn stamp_saved(&mut self, existing_created: Option<OffsetDateTime>) {
        let now = OffsetDateTime::now_utc();
        self.created_at = existing_created.or(self.created_at).or(Some(now));
        self.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ids_are_unique_within_a_millisecond() {
        let now = datetime!(2024-03-01 10:00:00.123 UTC);
        let first = next_entry_id(now);
        let second = next_entry_id(now);
        let first: i128 = first.parse().expect("numeric id");
        let second: i128 = second.parse().expect("numeric id");
        assert!(second > first);
    }

    #[test]
    fn json_uses_book_id_camel_case_and_iso_dates() -> anyhow::Result<()> {
        let entry = DiaryEntry {
            id: "1709287200123".into(),
            date: datetime!(2024-03-01 10:00:00.123456789 +02:00),
            content: "<p>Hello</p>".into(),
            mood: Some(Mood::Neutral),
            book_id: Some("travel".into()),
            created_at: None,
            updated_at: None,
        };
        let json = serde_json::to_value(&entry)?;
        assert_eq!(json["bookId"], "travel");
        assert_eq!(json["mood"], 3);
        assert_eq!(json["date"], "2024-03-01T10:00:00.123456789+02:00");
        assert!(json.get("created_at").is_none());

        let back: DiaryEntry = serde_json::from_value(json)?;
        assert_eq!(back, entry);
        Ok(())
    }

    #[test]
    fn missing_optional_fields_deserialize_as_none() -> anyhow::Result<()> {
        let entry: DiaryEntry = serde_json::from_str(
            r#"{"id":"1","date":"2024-01-02T03:04:05.000Z","content":"hi","mood":null}"#,
        )?;
        assert_eq!(entry.mood, None);
        assert_eq!(entry.book_id, None);
        assert_eq!(entry.updated_at, None);
        Ok(())
    }
}
