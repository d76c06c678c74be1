use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::AutoSaveConfig;
use crate::model::{DiaryEntry, EntryId};
use crate::repository::EntryRepository;

const SNAPSHOT_EXTENSION: &str = "json";
const SNAPSHOT_TMP_EXTENSION: &str = "json.tmp";
const SNAPSHOT_PREFIX: &str = "entry-";

#[derive(Debug, Clone)]
pub struct RecoverySnapshot {
    pub entry_id: EntryId,
    pub saved_at: OffsetDateTime,
    pub entry: DiaryEntry,
}

#[derive(Debug, Clone)]
pub enum AutoSaveStatus {
    Disabled,
    Inactive,
    Idle {
        entry_id: EntryId,
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        entry_id: EntryId,
        since: OffsetDateTime,
    },
    Error {
        entry_id: EntryId,
        message: String,
        occurred_at: OffsetDateTime,
    },
}

#[derive(Debug, Clone)]
pub enum AutoSaveEvent {
    Saved {
        entry: DiaryEntry,
        timestamp: OffsetDateTime,
    },
    Error {
        entry_id: EntryId,
        message: String,
    },
}

/// Debounced writer for the one entry open in an editor.
///
/// Every change restarts the quiet window; `poll` writes only once the
/// buffer has been left alone for the whole window. Closing the session
/// flushes whatever is still pending.
#[derive(Debug)]
pub struct AutoSaveRuntime {
    enabled: bool,
    crash_recovery: bool,
    debounce: Duration,
    journal_dir: PathBuf,
    session: Option<EditSession>,
}

#[derive(Debug)]
struct EditSession {
    entry: DiaryEntry,
    dirty: bool,
    dirty_since: Option<Instant>,
    dirty_since_wall: Option<OffsetDateTime>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<AutoSaveFailure>,
    snapshot_path: PathBuf,
}

#[derive(Debug, Clone)]
struct AutoSaveFailure {
    message: String,
    occurred_at: OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    entry_id: EntryId,
    saved_at: i64,
    entry: DiaryEntry,
}

impl AutoSaveRuntime {
    pub fn new(journal_dir: PathBuf, config: &AutoSaveConfig) -> Result<Self> {
        if config.crash_recovery {
            fs::create_dir_all(&journal_dir).with_context(|| {
                format!("creating autosave journal dir {}", journal_dir.display())
            })?;
        }
        Ok(Self {
            enabled: config.enabled,
            crash_recovery: config.crash_recovery,
            debounce: config.debounce_duration(),
            journal_dir,
            session: None,
        })
    }

    pub fn status(&self) -> AutoSaveStatus {
        if !self.enabled && !self.crash_recovery {
            return AutoSaveStatus::Disabled;
        }
        let Some(session) = &self.session else {
            return AutoSaveStatus::Inactive;
        };
        let entry_id = session.entry.id.clone();
        if let Some(failure) = &session.last_error {
            return AutoSaveStatus::Error {
                entry_id,
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if session.dirty {
            let since = session
                .dirty_since_wall
                .unwrap_or_else(OffsetDateTime::now_utc);
            return AutoSaveStatus::Pending { entry_id, since };
        }
        AutoSaveStatus::Idle {
            entry_id,
            last_saved_at: session.last_saved_at,
        }
    }

    /// Opens `entry` for editing. A leftover snapshot for the same id wins over
    /// the passed-in copy and is returned so the caller can say so.
    pub fn start_session(&mut self, entry: DiaryEntry) -> Result<Option<RecoverySnapshot>> {
        let snapshot = if self.crash_recovery {
            self.read_snapshot(&entry.id)?
        } else {
            None
        };

        let snapshot_path = self.snapshot_path(&entry.id);
        let buffered = snapshot
            .as_ref()
            .map(|snap| snap.entry.clone())
            .unwrap_or(entry);
        let mut session = EditSession::new(buffered, snapshot_path);

        if snapshot.is_some() {
            session.mark_dirty_immediate(self.debounce);
        }

        self.session = Some(session);
        Ok(snapshot)
    }

    pub fn update_buffer(&mut self, entry_id: &str, contents: &str) -> Result<()> {
        self.amend(entry_id, |entry| {
            if entry.content == contents {
                return false;
            }
            entry.content.clear();
            entry.content.push_str(contents);
            true
        })
    }

    /// Applies a change to the buffered entry. `edit` reports whether anything
    /// changed; only then does the debounce window restart.
    pub fn amend<F>(&mut self, entry_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut DiaryEntry) -> bool,
    {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.entry.id != entry_id {
            return Ok(());
        }
        if !edit(&mut session.entry) {
            return Ok(());
        }
        session.mark_dirty_now();
        if self.crash_recovery {
            Self::write_snapshot(&self.journal_dir, session)?;
        }
        Ok(())
    }

    pub fn poll(&mut self, repo: &dyn EntryRepository) -> Result<Option<AutoSaveEvent>> {
        if !self.enabled {
            return Ok(None);
        }
        self.flush_internal(repo, FlushKind::Debounced)
    }

    pub fn flush_now(&mut self, repo: &dyn EntryRepository) -> Result<Option<AutoSaveEvent>> {
        self.flush_internal(repo, FlushKind::Immediate)
    }

    /// Closes the session, writing pending changes first. A failed final
    /// write keeps the snapshot on disk for the next start.
    pub fn end_session(&mut self, repo: &dyn EntryRepository) -> Result<Option<AutoSaveEvent>> {
        if self.session.is_none() {
            return Ok(None);
        }
        let event = self.flush_internal(repo, FlushKind::Immediate)?;
        if let Some(session) = self.session.take() {
            if self.crash_recovery && session.last_error.is_none() {
                Self::remove_snapshot_path(&session.snapshot_path)?;
            }
        }
        Ok(event)
    }

    /// Throws away a leftover snapshot so the next session starts from the
    /// stored entry. Returns whether one existed.
    pub fn discard_snapshot(&self, entry_id: &str) -> Result<bool> {
        if !self.crash_recovery {
            return Ok(false);
        }
        let path = self.snapshot_path(entry_id);
        if !path.exists() {
            return Ok(false);
        }
        Self::remove_snapshot_path(&path)?;
        tracing::info!(id = %entry_id, "discarded autosave snapshot");
        Ok(true)
    }

    pub fn list_recovery(&self) -> Result<Vec<RecoverySnapshot>> {
        if !self.crash_recovery {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for path in self.snapshot_files()? {
            match self.read_snapshot_path(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    tracing::warn!(?err, "failed to parse autosave snapshot {}", path.display());
                }
            }
        }

        snapshots.sort_by(|a, b| match b.saved_at.cmp(&a.saved_at) {
            Ordering::Equal => b.entry_id.cmp(&a.entry_id),
            other => other,
        });
        Ok(snapshots)
    }

    /// Drops snapshots older than `retention`. The open entry's snapshot is
    /// never touched. Returns how many were removed.
    pub fn prune_snapshots(&self, retention: time::Duration) -> Result<usize> {
        if !self.crash_recovery {
            return Ok(0);
        }
        let Some(cutoff) = OffsetDateTime::now_utc().checked_sub(retention) else {
            return Ok(0);
        };
        let open = self.session.as_ref().map(|s| s.snapshot_path.as_path());
        let mut removed = 0;
        for snapshot in self.list_recovery()? {
            let path = self.snapshot_path(&snapshot.entry_id);
            if snapshot.saved_at >= cutoff || Some(path.as_path()) == open {
                continue;
            }
            Self::remove_snapshot_path(&path)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, "pruned stale autosave snapshots");
        }
        Ok(removed)
    }

    fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        let dir = match fs::read_dir(&self.journal_dir) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("reading autosave journal {}", self.journal_dir.display())
                })
            }
        };

        let mut paths = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(?err, "skipping unreadable autosave entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXTENSION)
            {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn flush_internal(
        &mut self,
        repo: &dyn EntryRepository,
        mode: FlushKind,
    ) -> Result<Option<AutoSaveEvent>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        if !session.dirty {
            return Ok(None);
        }
        if mode == FlushKind::Debounced {
            let ready = session
                .dirty_since
                .map(|since| since.elapsed() >= self.debounce)
                .unwrap_or(false);
            if !ready {
                return Ok(None);
            }
        }
        let timestamp = OffsetDateTime::now_utc();
        match repo.save(&session.entry) {
            Ok(saved) => {
                session.entry = saved.clone();
                session.dirty = false;
                session.dirty_since = None;
                session.dirty_since_wall = None;
                session.last_saved_at = Some(timestamp);
                session.last_error = None;
                if self.crash_recovery {
                    Self::remove_snapshot_path(&session.snapshot_path)?;
                }
                tracing::debug!(id = %saved.id, "autosaved entry");
                Ok(Some(AutoSaveEvent::Saved {
                    entry: saved,
                    timestamp,
                }))
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(id = %session.entry.id, error = %message, "autosave failed");
                session.last_error = Some(AutoSaveFailure {
                    message: message.clone(),
                    occurred_at: timestamp,
                });
                if self.crash_recovery {
                    Self::write_snapshot(&self.journal_dir, session)?;
                }
                Ok(Some(AutoSaveEvent::Error {
                    entry_id: session.entry.id.clone(),
                    message,
                }))
            }
        }
    }

    fn write_snapshot(dir: &Path, session: &EditSession) -> Result<()> {
        let record = SnapshotRecord {
            entry_id: session.entry.id.clone(),
            saved_at: OffsetDateTime::now_utc().unix_timestamp(),
            entry: session.entry.clone(),
        };
        let json = serde_json::to_vec_pretty(&record).context("serialising autosave snapshot")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("ensuring autosave dir {}", dir.display()))?;
        let final_path = session.snapshot_path.clone();
        let tmp_path = final_path.with_extension(SNAPSHOT_TMP_EXTENSION);
        fs::write(&tmp_path, &json).with_context(|| {
            format!("writing temporary autosave snapshot {}", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "atomically persisting autosave snapshot {}",
                final_path.display()
            )
        })?;
        Ok(())
    }

    fn read_snapshot(&self, entry_id: &str) -> Result<Option<RecoverySnapshot>> {
        let path = self.snapshot_path(entry_id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_snapshot_path(&path).map(Some)
    }

    fn read_snapshot_path(&self, path: &Path) -> Result<RecoverySnapshot> {
        let raw = fs::read(path)
            .with_context(|| format!("reading autosave snapshot {}", path.display()))?;
        let record: SnapshotRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing autosave snapshot {}", path.display()))?;
        let saved_at = OffsetDateTime::from_unix_timestamp(record.saved_at)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        Ok(RecoverySnapshot {
            entry_id: record.entry_id,
            saved_at,
            entry: record.entry,
        })
    }

    fn remove_snapshot_path(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing autosave snapshot {}", path.display()))
            }
        }
    }

    fn snapshot_path(&self, entry_id: &str) -> PathBuf {
        let safe: String = entry_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.journal_dir
            .join(format!("{SNAPSHOT_PREFIX}{safe}.{SNAPSHOT_EXTENSION}"))
    }
}

impl EditSession {
    fn new(entry: DiaryEntry, snapshot_path: PathBuf) -> Self {
        Self {
            entry,
            dirty: false,
            dirty_since: None,
            dirty_since_wall: None,
            last_saved_at: None,
            last_error: None,
            snapshot_path,
        }
    }

    fn mark_dirty_now(&mut self) {
        self.dirty = true;
        self.dirty_since = Some(Instant::now());
        self.dirty_since_wall = Some(OffsetDateTime::now_utc());
        self.last_error = None;
    }

    fn mark_dirty_immediate(&mut self, debounce: Duration) {
        let now = Instant::now();
        self.dirty = true;
        self.dirty_since = Some(now.checked_sub(debounce).unwrap_or(now));
        self.dirty_since_wall = Some(OffsetDateTime::now_utc());
        self.last_error = None;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FlushKind {
    Debounced,
    Immediate,
}
