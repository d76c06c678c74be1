use anyhow::{Context, Result};

use crate::model::DiaryEntry;
use crate::remote::{RemoteClient, RemoteEntryRow, RemoteResult};

use super::{EntryRepository, RepositoryKind};

/// Row operations on the hosted entries table.
pub trait EntryTable {
    fn upsert(&self, rows: &[RemoteEntryRow]) -> RemoteResult<Vec<RemoteEntryRow>>;
    fn select(&self) -> RemoteResult<Vec<RemoteEntryRow>>;
    fn remove(&self, id: &str) -> RemoteResult<()>;
}

impl EntryTable for RemoteClient {
    fn upsert(&self, rows: &[RemoteEntryRow]) -> RemoteResult<Vec<RemoteEntryRow>> {
        self.upsert_entries(rows)
    }

    fn select(&self) -> RemoteResult<Vec<RemoteEntryRow>> {
        self.select_entries()
    }

    fn remove(&self, id: &str) -> RemoteResult<()> {
        self.delete_entry(id)
    }
}

/// Entries stored in the hosted table on behalf of one signed-in user.
pub struct RemoteEntryRepository<T = RemoteClient> {
    table: T,
    user_id: String,
}

impl<T: EntryTable> RemoteEntryRepository<T> {
    pub fn new(table: T, user_id: &str) -> Self {
        Self {
            table,
            user_id: user_id.to_string(),
        }
    }
}

impl<T: EntryTable> EntryRepository for RemoteEntryRepository<T> {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Remote
    }

    fn list(&self) -> Result<Vec<DiaryEntry>> {
        let rows = self.table.select().context("loading cloud entries")?;
        Ok(rows.into_iter().map(DiaryEntry::from).collect())
    }

    /// The stored row comes back from the table; an empty answer means the
    /// row was written as sent.
    fn save(&self, entry: &DiaryEntry) -> Result<DiaryEntry> {
        let row = RemoteEntryRow::from_entry(entry, Some(&self.user_id));
        let mut stored = self
            .table
            .upsert(std::slice::from_ref(&row))
            .with_context(|| format!("saving entry {} to the cloud", entry.id))?;
        tracing::debug!(id = %entry.id, "entry saved to cloud");
        Ok(stored.pop().unwrap_or(row).into())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.table
            .remove(id)
            .with_context(|| format!("deleting cloud entry {id}"))?;
        Ok(true)
    }
}
