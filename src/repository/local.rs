use anyhow::{Context, Result};

use crate::model::{Book, BookColor, DiaryEntry, ModelError, Mood, MoodSample};
use crate::storage::{keys, StorageHandle};

use super::{BookDeleteOutcome, BookRepository, EntryRepository, MoodRepository, RepositoryKind};

#[derive(Clone)]
pub struct LocalEntryRepository {
    storage: StorageHandle,
}

impl LocalEntryRepository {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    fn load(&self) -> Result<Vec<DiaryEntry>> {
        self.storage.read_collection(keys::ENTRIES)
    }

    fn store(&self, entries: &[DiaryEntry]) -> Result<()> {
        self.storage
            .write_json(keys::ENTRIES, entries)
            .context("saving entries")
    }
}

impl EntryRepository for LocalEntryRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Local
    }

    fn list(&self) -> Result<Vec<DiaryEntry>> {
        let mut entries = self.load()?;
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }

    fn save(&self, entry: &DiaryEntry) -> Result<DiaryEntry> {
        let mut entries = self.load()?;
        let mut saved = entry.clone();
        match entries.iter().position(|existing| existing.id == entry.id) {
            Some(index) => {
                saved.stamp_saved(entries[index].created_at);
                entries[index] = saved.clone();
            }
            None => {
                saved.stamp_saved(None);
                entries.insert(0, saved.clone());
            }
        }
        self.store(&entries)?;
        tracing::debug!(id = %saved.id, "entry saved locally");
        Ok(saved)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.store(&entries)?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct LocalBookRepository {
    storage: StorageHandle,
}

impl LocalBookRepository {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    fn store(&self, books: &[Book]) -> Result<()> {
        self.storage
            .write_json(keys::BOOKS, books)
            .context("saving books")
    }

    pub fn current_book(&self) -> Result<Option<Book>> {
        let Some(id) = self.storage.read_json::<String>(keys::CURRENT_BOOK)? else {
            return Ok(None);
        };
        self.get(&id)
    }

    /// `None` selects every book.
    pub fn set_current_book(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.storage.write_json(keys::CURRENT_BOOK, id),
            None => self.storage.remove_key(keys::CURRENT_BOOK).map(|_| ()),
        }
    }
}

impl BookRepository for LocalBookRepository {
    fn list(&self) -> Result<Vec<Book>> {
        self.storage.read_collection(keys::BOOKS)
    }

    fn create(&self, name: &str, color: Option<BookColor>) -> Result<Book> {
        let book = Book::new(name, color)?;
        let mut books = self.list()?;
        if books
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&book.name))
        {
            return Err(ModelError::DuplicateBook(book.name).into());
        }
        books.push(book.clone());
        self.store(&books)?;
        tracing::info!(id = %book.id, name = %book.name, "book created");
        Ok(book)
    }

    fn delete(&self, id: &str, entries: &dyn EntryRepository) -> Result<Option<BookDeleteOutcome>> {
        let mut books = self.list()?;
        let Some(index) = books.iter().position(|book| book.id == id) else {
            return Ok(None);
        };

        let mut detached = 0;
        for mut entry in entries.list()?.into_iter().filter(|e| e.belongs_to(id)) {
            entry.book_id = None;
            entries
                .save(&entry)
                .with_context(|| format!("detaching entry {} from book {id}", entry.id))?;
            detached += 1;
        }

        let book = books.remove(index);
        self.store(&books)?;
        let current = self.storage.read_json::<String>(keys::CURRENT_BOOK)?;
        if current.as_deref() == Some(id) {
            self.set_current_book(None)?;
        }
        tracing::info!(id = %book.id, detached, "book deleted");
        Ok(Some(BookDeleteOutcome { book, detached }))
    }
}

#[derive(Clone)]
pub struct LocalMoodRepository {
    storage: StorageHandle,
}

impl LocalMoodRepository {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }
}

impl MoodRepository for LocalMoodRepository {
    fn list(&self) -> Result<Vec<MoodSample>> {
        let mut samples: Vec<MoodSample> = self.storage.read_collection(keys::MOODS)?;
        samples.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(samples)
    }

    fn record(&self, mood: Mood, note: Option<String>) -> Result<MoodSample> {
        let sample = MoodSample::new(mood, note);
        let mut samples: Vec<MoodSample> = self.storage.read_collection(keys::MOODS)?;
        samples.insert(0, sample.clone());
        self.storage
            .write_json(keys::MOODS, &samples)
            .context("saving mood samples")?;
        Ok(sample)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut samples: Vec<MoodSample> = self.storage.read_collection(keys::MOODS)?;
        let before = samples.len();
        samples.retain(|sample| sample.id != id);
        if samples.len() == before {
            return Ok(false);
        }
        self.storage
            .write_json(keys::MOODS, &samples)
            .context("saving mood samples")?;
        Ok(true)
    }
}
