//! Slot identity persistence
//!
//! Remembers which destination message represents each output slot, as a flat
//! JSON object `{ "streams": 1234, ... }`. Writes go to a temp file in the same
//! directory and are renamed over the target.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Errors that can occur while persisting slot identities
#[derive(Error, Debug)]
pub enum StorageError {
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Temp file could not be renamed over the target
    #[error("Persist error: {0}")]
    Persist(#[from] tempfile::PersistError),
    /// Blocking writer task failed
    #[error("Writer task failed: {0}")]
    Task(String),
}

/// Opaque identity of a message in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot key -> message identity
pub type SlotIdentities = BTreeMap<String, MessageId>;

/// Read the mapping from `path`.
///
/// A missing file is an empty mapping.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_slot_identities(path: &Path) -> Result<SlotIdentities, StorageError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SlotIdentities::new()),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace the mapping at `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the temp file cannot be written or renamed.
pub fn save_slot_identities(path: &Path, identities: &SlotIdentities) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix("msg-")
        .suffix(".json")
        .tempfile_in(&dir)?;
    serde_json::to_writer(&mut tmp, identities)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// In-memory slot identities, flushed to disk on every change
pub struct SlotStore {
    path: PathBuf,
    identities: Mutex<SlotIdentities>,
}

impl SlotStore {
    /// Load the store from `path`.
    ///
    /// Unreadable files are logged and treated as empty so a corrupt file never
    /// blocks startup.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identities = match load_slot_identities(&path) {
            Ok(ids) => {
                debug!(path = %path.display(), slots = ids.len(), "Loaded slot identities");
                ids
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load slot identities");
                SlotIdentities::new()
            }
        };
        Self::with_identities(path, identities)
    }

    /// Create a store with an initial mapping, without touching disk
    #[must_use]
    pub fn with_identities(path: impl Into<PathBuf>, identities: SlotIdentities) -> Self {
        Self {
            path: path.into(),
            identities: Mutex::new(identities),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remembered message for `slot`
    pub async fn get(&self, slot: &str) -> Option<MessageId> {
        self.identities.lock().await.get(slot).copied()
    }

    /// Copy of the full mapping
    pub async fn snapshot(&self) -> SlotIdentities {
        self.identities.lock().await.clone()
    }

    /// Record `id` for `slot` and flush the whole mapping.
    ///
    /// The in-memory entry is updated even if the flush fails. The lock is held
    /// across the write so concurrent flushes cannot land out of order.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping could not be written.
    pub async fn remember(&self, slot: &str, id: MessageId) -> Result<(), StorageError> {
        let mut guard = self.identities.lock().await;
        guard.insert(slot.to_string(), id);

        let snapshot = guard.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_slot_identities(&path, &snapshot))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let ids = load_slot_identities(&dir.path().join("absent.json"))?;
        assert!(ids.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_creates_parent_and_reads_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("message_ids.json");

        let mut ids = SlotIdentities::new();
        ids.insert("streams".to_string(), MessageId(42));
        save_slot_identities(&path, &ids)?;

        assert_eq!(std::fs::read_to_string(&path)?, r#"{"streams":42}"#);
        assert_eq!(load_slot_identities(&path)?, ids);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_loads_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("message_ids.json");
        std::fs::write(&path, "{not json")?;

        assert!(load_slot_identities(&path).is_err());
        let store = SlotStore::load(&path);
        assert_eq!(store.path(), path.as_path());
        Ok(())
    }

    #[tokio::test]
    async fn test_remember_flushes_immediately() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("message_ids.json");
        let store = SlotStore::load(&path);

        store.remember("stats", MessageId(7)).await?;
        store.remember("streams", MessageId(9)).await?;

        assert_eq!(store.get("stats").await, Some(MessageId(7)));
        let on_disk = load_slot_identities(&path)?;
        assert_eq!(on_disk.get("streams"), Some(&MessageId(9)));
        assert_eq!(on_disk, store.snapshot().await);

        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path())?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("msg-"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }
}
