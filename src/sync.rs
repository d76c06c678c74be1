//! One-shot push of entries written on this device into the cloud table,
//! run on the first signed-in start.
//!
//! All rows go out in a single upsert. There is no per-entry acknowledgment,
//! so a failure part-way leaves the local copy intact and the next run pushes
//! everything again (the upsert is keyed by id, so repeats do not duplicate).

use anyhow::Result;

use crate::model::DiaryEntry;
use crate::remote::{RemoteClient, RemoteEntryRow, Session};
use crate::storage::{keys, StorageHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NotConfigured,
    NoSession,
    AlreadySynced,
    NothingToSync,
    Pushed { count: usize },
    Failed { message: String },
}

/// Destination for the bridge. The remote client is the real one; tests use
/// an in-memory table.
pub trait EntrySink {
    fn push(&self, rows: &[RemoteEntryRow]) -> Result<()>;
}

impl EntrySink for RemoteClient {
    fn push(&self, rows: &[RemoteEntryRow]) -> Result<()> {
        self.upsert_entries(rows)?;
        Ok(())
    }
}

pub fn sync_completed(storage: &StorageHandle) -> Result<bool> {
    Ok(storage
        .read_json::<bool>(keys::SYNC_COMPLETED)?
        .unwrap_or(false))
}

pub fn sync_local_to_cloud(
    storage: &StorageHandle,
    sink: Option<&dyn EntrySink>,
    session: Option<&Session>,
) -> Result<SyncOutcome> {
    let Some(sink) = sink else {
        return Ok(SyncOutcome::NotConfigured);
    };
    let Some(user) = session.and_then(Session::user) else {
        return Ok(SyncOutcome::NoSession);
    };

    let entries: Vec<DiaryEntry> = storage.read_collection(keys::ENTRIES)?;
    if entries.is_empty() {
        storage.write_json(keys::SYNC_COMPLETED, &true)?;
        return Ok(SyncOutcome::NothingToSync);
    }

    let rows: Vec<RemoteEntryRow> = entries
        .iter()
        .map(|entry| RemoteEntryRow::from_entry(entry, Some(&user.id)))
        .collect();
    match sink.push(&rows) {
        Ok(()) => {
            storage.remove_key(keys::ENTRIES)?;
            storage.write_json(keys::SYNC_COMPLETED, &true)?;
            tracing::info!(count = rows.len(), user = %user.id, "local entries pushed to cloud");
            Ok(SyncOutcome::Pushed { count: rows.len() })
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::error!(error = %message, "sync failed, local entries kept");
            Ok(SyncOutcome::Failed { message })
        }
    }
}

/// Runs the bridge unless a previous run already completed.
pub fn sync_after_login(
    storage: &StorageHandle,
    sink: Option<&dyn EntrySink>,
    session: Option<&Session>,
) -> Result<SyncOutcome> {
    if sync_completed(storage)? {
        return Ok(SyncOutcome::AlreadySynced);
    }
    sync_local_to_cloud(storage, sink, session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mood;
    use crate::remote::SessionUser;
    use crate::repository::{EntryRepository, LocalEntryRepository};
    use crate::storage::tests::init_storage;
    use anyhow::anyhow;
    use assert_matches::assert_matches;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemoryTable {
        rows: RefCell<Vec<RemoteEntryRow>>,
        fail: bool,
    }

    impl EntrySink for MemoryTable {
        fn push(&self, rows: &[RemoteEntryRow]) -> Result<()> {
            if self.fail {
                return Err(anyhow!("backend error (503): unavailable"));
            }
            let mut table = self.rows.borrow_mut();
            for row in rows {
                table.retain(|existing| existing.id != row.id);
                table.push(row.clone());
            }
            Ok(())
        }
    }

    fn session() -> Session {
        Session {
            access_token: "jwt".into(),
            refresh_token: None,
            expires_at: None,
            user: Some(SessionUser {
                id: "user-9".into(),
                email: None,
            }),
        }
    }

    #[test]
    fn guards_run_before_any_push() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let table = MemoryTable::default();
        assert_eq!(
            sync_local_to_cloud(&storage, None, Some(&session()))?,
            SyncOutcome::NotConfigured
        );
        assert_eq!(
            sync_local_to_cloud(&storage, Some(&table), None)?,
            SyncOutcome::NoSession
        );
        assert_eq!(
            sync_local_to_cloud(&storage, Some(&table), Some(&session()))?,
            SyncOutcome::NothingToSync
        );
        assert!(table.rows.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn pushes_with_user_id_and_clears_local_entries() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let local = LocalEntryRepository::new(storage.clone());
        local.save(&DiaryEntry::new(None).with_mood(Some(Mood::Happy)))?;
        local.save(&DiaryEntry::new(Some("b".into())))?;

        let table = MemoryTable::default();
        let outcome = sync_after_login(&storage, Some(&table), Some(&session()))?;
        assert_eq!(outcome, SyncOutcome::Pushed { count: 2 });
        assert!(table
            .rows
            .borrow()
            .iter()
            .all(|row| row.user_id.as_deref() == Some("user-9")));
        assert!(local.list()?.is_empty());
        assert!(sync_completed(&storage)?);

        local.save(&DiaryEntry::new(None))?;
        assert_eq!(
            sync_after_login(&storage, Some(&table), Some(&session()))?,
            SyncOutcome::AlreadySynced
        );
        assert_eq!(table.rows.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn failure_keeps_local_entries() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let local = LocalEntryRepository::new(storage.clone());
        local.save(&DiaryEntry::new(None))?;

        let table = MemoryTable {
            fail: true,
            ..MemoryTable::default()
        };
        let outcome = sync_after_login(&storage, Some(&table), Some(&session()))?;
        assert_matches!(outcome, SyncOutcome::Failed { ref message } if message.contains("503"));
        assert_eq!(local.list()?.len(), 1);
        assert!(!sync_completed(&storage)?);
        Ok(())
    }
}
