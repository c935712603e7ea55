//! The durable slot backing the deferred action queue.
//!
//! The queue is persisted as one opaque blob (a JSON array, but the slot does
//! not care) that is read, modified, and written back as a whole. Any backend
//! with atomic whole-slot replacement satisfies the contract; mutual exclusion
//! between appenders and the sweeper is the queue's responsibility, not the
//! slot's.

use std::path::PathBuf;
use std::sync::Mutex;

use super::StoreError;
use super::fsync::write_atomic;

/// Whole-slot load/save access for the deferred queue.
pub trait QueueStore: Send + Sync {
    /// Loads the slot contents. `None` means the slot has never been written.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the slot contents.
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError>;
}

/// In-memory slot for tests.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(bytes.to_vec());
        Ok(())
    }
}

/// File-backed slot using atomic replacement
/// (write-temp/fsync/rename/fsync-dir).
#[derive(Debug)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileQueueStore { path: path.into() }
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path, bytes)?;
        Ok(())
    }
}
