//! Domain types shared by every store: diary entries, books, mood samples and
//! the mood scale itself.

mod book;
mod entry;
mod mood;
mod sample;

pub use book::{Book, BookColor, BookId, BOOK_NAME_MAX_LEN};
pub use entry::{next_entry_id, DiaryEntry, EntryId};
pub use mood::{Mood, MoodStyle, MOOD_TABLE};
pub use sample::MoodSample;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("mood must be 1-5 or one of happy, excited, neutral, sad, angry (got {0:?})")]
    InvalidMood(String),
    #[error("book name cannot be empty")]
    EmptyBookName,
    #[error("a book named '{0}' already exists")]
    DuplicateBook(String),
    #[error("unknown book colour {0:?}")]
    UnknownColor(String),
}
