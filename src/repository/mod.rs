//! Store interfaces for entries, books and mood samples, with local and
//! remote implementations picked by session state.

use std::cell::RefCell;
use std::fmt;

use anyhow::Result;

use crate::model::{Book, BookColor, BookId, DiaryEntry, Mood, MoodSample};
use crate::remote::{RemoteClient, RemoteError, Session};
use crate::storage::StorageHandle;

mod local;
mod remote;

pub use local::{LocalBookRepository, LocalEntryRepository, LocalMoodRepository};
pub use remote::{EntryTable, RemoteEntryRepository};

pub const REMOTE_FALLBACK_NOTICE: &str =
    "Could not reach cloud storage, showing entries saved on this device";
pub const SESSION_EXPIRED_NOTICE: &str =
    "Cloud sign-in has expired, showing entries saved on this device. Run `diary auth login` again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryKind {
    Local,
    Remote,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryKind::Local => f.write_str("local"),
            RepositoryKind::Remote => f.write_str("cloud"),
        }
    }
}

pub trait EntryRepository {
    fn kind(&self) -> RepositoryKind;

    /// Newest first.
    fn list(&self) -> Result<Vec<DiaryEntry>>;

    fn get(&self, id: &str) -> Result<Option<DiaryEntry>> {
        Ok(self.list()?.into_iter().find(|entry| entry.id == id))
    }

    /// Insert or replace by id. Saving the same entry twice leaves one copy.
    fn save(&self, entry: &DiaryEntry) -> Result<DiaryEntry>;

    fn delete(&self, id: &str) -> Result<bool>;

    /// A user-facing notice left by the last degraded read, if any.
    fn take_notice(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDeleteOutcome {
    pub book: Book,
    pub detached: usize,
}

pub trait BookRepository {
    /// In creation order.
    fn list(&self) -> Result<Vec<Book>>;

    fn get(&self, id: &str) -> Result<Option<Book>> {
        Ok(self.list()?.into_iter().find(|book| book.id == id))
    }

    /// Looks a book up by id, falling back to a case-insensitive name match.
    fn find(&self, key: &str) -> Result<Option<Book>> {
        let key = key.trim();
        let books = self.list()?;
        if let Some(book) = books.iter().find(|book| book.id == key) {
            return Ok(Some(book.clone()));
        }
        Ok(books
            .into_iter()
            .find(|book| book.name.eq_ignore_ascii_case(key)))
    }

    fn create(&self, name: &str, color: Option<BookColor>) -> Result<Book>;

    /// Removes the book and moves its entries to "unfiled".
    fn delete(&self, id: &str, entries: &dyn EntryRepository) -> Result<Option<BookDeleteOutcome>>;
}

pub trait MoodRepository {
    /// Newest first.
    fn list(&self) -> Result<Vec<MoodSample>>;

    fn record(&self, mood: Mood, note: Option<String>) -> Result<MoodSample>;

    fn delete(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookFilter {
    All,
    Book(BookId),
    Unfiled,
}

impl BookFilter {
    pub fn matches(&self, entry: &DiaryEntry) -> bool {
        match self {
            BookFilter::All => true,
            BookFilter::Book(id) => entry.belongs_to(id),
            BookFilter::Unfiled => entry.book_id.is_none(),
        }
    }
}

pub fn filter_by_book(entries: Vec<DiaryEntry>, filter: &BookFilter) -> Vec<DiaryEntry> {
    entries
        .into_iter()
        .filter(|entry| filter.matches(entry))
        .collect()
}

/// Reads from the remote store, answering from local storage when the remote
/// read fails. The reason is kept for the caller to show.
pub struct FallbackEntryRepository {
    primary: Box<dyn EntryRepository>,
    local: LocalEntryRepository,
    notice: RefCell<Option<String>>,
}

impl FallbackEntryRepository {
    pub fn new(primary: Box<dyn EntryRepository>, local: LocalEntryRepository) -> Self {
        Self {
            primary,
            local,
            notice: RefCell::new(None),
        }
    }

    fn note_failure(&self, err: &anyhow::Error) {
        let expired = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<RemoteError>())
            .any(RemoteError::is_auth_failure);
        let notice = if expired {
            SESSION_EXPIRED_NOTICE
        } else {
            REMOTE_FALLBACK_NOTICE
        };
        *self.notice.borrow_mut() = Some(notice.to_string());
    }
}

impl EntryRepository for FallbackEntryRepository {
    fn kind(&self) -> RepositoryKind {
        self.primary.kind()
    }

    fn list(&self) -> Result<Vec<DiaryEntry>> {
        match self.primary.list() {
            Ok(entries) => Ok(entries),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "remote read failed, using local entries");
                self.note_failure(&err);
                self.local.list()
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<DiaryEntry>> {
        match self.primary.get(id) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), %id, "remote read failed, using local entry");
                self.note_failure(&err);
                self.local.get(id)
            }
        }
    }

    fn save(&self, entry: &DiaryEntry) -> Result<DiaryEntry> {
        self.primary.save(entry)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.primary.delete(id)
    }

    fn take_notice(&self) -> Option<String> {
        self.notice.borrow_mut().take()
    }
}

pub struct Repositories {
    pub entries: Box<dyn EntryRepository>,
    pub books: Box<dyn BookRepository>,
    pub moods: Box<dyn MoodRepository>,
}

impl Repositories {
    /// Entries go to the remote table only when cloud features are configured
    /// and a signed-in user exists; everything else stays on the device.
    pub fn select(
        storage: &StorageHandle,
        remote: Option<RemoteClient>,
        session: Option<&Session>,
    ) -> Self {
        let local_entries = LocalEntryRepository::new(storage.clone());
        let user = session.and_then(Session::user);
        let entries: Box<dyn EntryRepository> = match (remote, user) {
            (Some(client), Some(user)) => {
                tracing::debug!(user = %user.id, "using cloud entry storage");
                let remote = RemoteEntryRepository::new(client.with_session(session), &user.id);
                Box::new(FallbackEntryRepository::new(Box::new(remote), local_entries))
            }
            _ => Box::new(local_entries),
        };
        Self {
            entries,
            books: Box::new(LocalBookRepository::new(storage.clone())),
            moods: Box::new(LocalMoodRepository::new(storage.clone())),
        }
    }

    pub fn local(storage: &StorageHandle) -> Self {
        Self::select(storage, None, None)
    }
}
