//! Durable per-user row store for mute escalation levels.
//!
//! Levels are deliberately not TTL-bound: a repeat offender keeps their level
//! across counter decay and process restarts. The store is keyed by user id
//! with get/set-one-row semantics, so any backend with atomic whole-row
//! replacement satisfies it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::StoreError;
use super::fsync::write_atomic;
use crate::types::UserId;

/// A user's durable escalation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteLevelRow {
    pub user: UserId,

    /// Current escalation level, 0 meaning "never escalated".
    /// Strictly increases; never auto-decremented.
    pub level: u32,

    /// When the level last changed.
    pub updated_at: DateTime<Utc>,
}

impl MuteLevelRow {
    /// A fresh row at level 0.
    pub fn new(user: UserId) -> Self {
        MuteLevelRow {
            user,
            level: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Get/set-one-row access to durable per-user state.
pub trait RowStore: Send + Sync {
    /// Fetches the row for `user`, if one exists.
    fn get(&self, user: UserId) -> Result<Option<MuteLevelRow>, StoreError>;

    /// Replaces the row for `row.user`.
    fn put(&self, row: &MuteLevelRow) -> Result<(), StoreError>;
}

/// In-memory row store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    rows: Mutex<HashMap<UserId, MuteLevelRow>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowStore for MemoryRowStore {
    fn get(&self, user: UserId) -> Result<Option<MuteLevelRow>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(rows.get(&user).cloned())
    }

    fn put(&self, row: &MuteLevelRow) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        rows.insert(row.user, row.clone());
        Ok(())
    }
}

/// File-backed row store.
///
/// All rows live in one JSON file replaced atomically on every write
/// (write-temp/fsync/rename/fsync-dir). A corrupt file is discarded and
/// treated as empty rather than blocking every future escalation.
#[derive(Debug)]
pub struct FileRowStore {
    path: PathBuf,
    // Serializes the read-modify-write cycle within this process.
    write_lock: Mutex<()>,
}

impl FileRowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileRowStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<UserId, MuteLevelRow>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt level store discarded");
                Ok(HashMap::new())
            }
        }
    }
}

impl RowStore for FileRowStore {
    fn get(&self, user: UserId) -> Result<Option<MuteLevelRow>, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.load()?.remove(&user))
    }

    fn put(&self, row: &MuteLevelRow) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut rows = self.load()?;
        rows.insert(row.user, row.clone());
        write_atomic(&self.path, &serde_json::to_vec_pretty(&rows)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryRowStore::new();
        assert_eq!(store.get(UserId(1)).unwrap(), None);

        let mut row = MuteLevelRow::new(UserId(1));
        row.level = 2;
        store.put(&row).unwrap();

        assert_eq!(store.get(UserId(1)).unwrap(), Some(row));
        assert_eq!(store.get(UserId(2)).unwrap(), None);
    }

    #[test]
    fn file_store_roundtrip_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("levels.json");

        {
            let store = FileRowStore::new(&path);
            let mut row = MuteLevelRow::new(UserId(9));
            row.level = 3;
            store.put(&row).unwrap();
        }

        // A new handle over the same file sees the persisted row.
        let store = FileRowStore::new(&path);
        assert_eq!(store.get(UserId(9)).unwrap().map(|r| r.level), Some(3));
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileRowStore::new(dir.path().join("levels.json"));
        assert_eq!(store.get(UserId(1)).unwrap(), None);
    }

    #[test]
    fn file_store_corrupt_file_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("levels.json");
        std::fs::write(&path, b"{not valid json").unwrap();

        let store = FileRowStore::new(&path);
        assert_eq!(store.get(UserId(1)).unwrap(), None);

        // Writing over the corrupt file works.
        store.put(&MuteLevelRow::new(UserId(1))).unwrap();
        assert!(store.get(UserId(1)).unwrap().is_some());
    }
}
