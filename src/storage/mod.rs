//! On-device persistence. Every collection lives under one key in a small
//! key/value table, JSON-encoded, so the layout mirrors the browser storage the
//! diary data originally came from.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use crate::config::StorageOptions;
use crate::model::{DiaryEntry, Mood};

mod schema;

pub mod keys {
    pub const ENTRIES: &str = "diaryEntries";
    pub const BOOKS: &str = "diaryBooks";
    pub const MOODS: &str = "moodEntries";
    pub const SESSION: &str = "authSession";
    pub const SYNC_COMPLETED: &str = "cloudSyncCompleted";
    pub const CURRENT_BOOK: &str = "currentBookId";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn read_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("reading key {key}"))
        })
    }

    pub fn write_raw(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("writing key {key}"))?;
            Ok(())
        })
    }

    /// Loads a JSON value. A value that no longer parses is reported and then
    /// treated as if nothing had been saved.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.read_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(%key, %err, "failed to parse saved data, ignoring it");
                Ok(None)
            }
        }
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json =
            serde_json::to_string(value).with_context(|| format!("serialising key {key}"))?;
        self.write_raw(key, &json)
    }

    pub fn read_collection<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        Ok(self.read_json(key)?.unwrap_or_default())
    }

    pub fn remove_key(&self, key: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
                .with_context(|| format!("removing key {key}"))?;
            Ok(removed > 0)
        })
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()
                .context("listing stored keys")?;
            Ok(keys)
        })
    }

    pub fn backup_to(&self, dir: &Path) -> Result<BackupRecord> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating backup directory {}", dir.display()))?;
        let now = OffsetDateTime::now_utc();
        let stamp = now
            .format(format_description!(
                "[year][month][day]T[hour][minute][second].[subsecond digits:3]Z"
            ))
            .context("formatting backup timestamp")?;
        let path = unused_backup_path(dir, &stamp);
        self.with_connection(|conn| {
            conn.backup(DatabaseName::Main, &path, None)
                .with_context(|| format!("backing up database to {}", path.display()))?;
            conn.execute(
                "INSERT INTO backups (created_at, path) VALUES (?1, ?2)",
                params![now.unix_timestamp(), path.to_string_lossy()],
            )
            .context("recording backup")?;
            Ok(())
        })?;
        tracing::info!(path = %path.display(), "database backup written");
        Ok(BackupRecord {
            path,
            created_at: now.unix_timestamp(),
        })
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT path, created_at FROM backups ORDER BY created_at DESC, id DESC")?;
            let records = stmt
                .query_map([], |row| {
                    Ok(BackupRecord {
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        created_at: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()
                .context("listing backups")?;
            Ok(records)
        })
    }
}

/// Backups taken within the same millisecond get a numbered suffix.
fn unused_backup_path(dir: &Path, stamp: &str) -> PathBuf {
    let mut path = dir.join(format!("diary-{stamp}.db"));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("diary-{stamp}-{counter}.db"));
        counter += 1;
    }
    path
}

pub fn init(storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = &storage.database_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    drop(conn);

    let handle = StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    };
    if !existed && storage.seed_first_run {
        seed_initial_entries(&handle)?;
    }
    Ok(handle)
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn seed_initial_entries(storage: &StorageHandle) -> Result<()> {
    if storage.read_raw(keys::ENTRIES)?.is_some() {
        return Ok(());
    }

    tracing::info!("seeding first-run entries");
    let today = DiaryEntry::new(None)
        .with_content(
            "Today was a great day! I accomplished so much and felt really productive.",
        )
        .with_mood(Some(Mood::Happy));
    let mut yesterday = DiaryEntry::new(None)
        .with_content(
            "Feeling a bit overwhelmed with work today. Need to take some time for myself.",
        )
        .with_mood(Some(Mood::Sad));
    yesterday.date -= Duration::days(1);
    storage.write_json(keys::ENTRIES, &[today, yesterday])
}
