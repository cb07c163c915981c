//! Durable storage for conversation turns and finalized checkpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use tether_types::{ChatTurn, Checkpoint};
use tether_utils::{PersistMode, atomic_write_with_mode, recover_bak_file};

pub const TURNS_BLOB: &str = "turns.json";
pub const CHECKPOINTS_BLOB: &str = "checkpoints.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage I/O failed for {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Named byte blobs. Writes replace the whole blob.
pub trait BlobStore: Send + Sync {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError>;
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError>;
}

/// One file per blob under a directory, written atomically and owner-only.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.tether/sessions/<session>`.
    #[must_use]
    pub fn for_session(session: &str) -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".tether").join("sessions").join(session)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobStore for FileBlobStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        atomic_write_with_mode(self.dir.join(name), bytes, PersistMode::OwnerOnly).map_err(|source| {
            PersistError::Io {
                name: name.to_string(),
                source,
            }
        })
    }

    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.dir.join(name);
        recover_bak_file(&path);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// In-process store; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }
}

fn save_json<T: Serialize + ?Sized>(store: &dyn BlobStore, name: &str, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Serialize {
        name: name.to_string(),
        source,
    })?;
    store.save(name, &bytes)
}

fn load_json<T: DeserializeOwned>(store: &dyn BlobStore, name: &str) -> Result<Option<T>, PersistError> {
    let Some(bytes) = store.load(name)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistError::Serialize {
            name: name.to_string(),
            source,
        })
}

pub fn save_turns(store: &dyn BlobStore, turns: &[ChatTurn]) -> Result<(), PersistError> {
    save_json(store, TURNS_BLOB, turns)
}

pub fn load_turns(store: &dyn BlobStore) -> Result<Vec<ChatTurn>, PersistError> {
    Ok(load_json(store, TURNS_BLOB)?.unwrap_or_default())
}

pub fn save_checkpoints(store: &dyn BlobStore, checkpoints: &[Checkpoint]) -> Result<(), PersistError> {
    save_json(store, CHECKPOINTS_BLOB, checkpoints)
}

pub fn load_checkpoints(store: &dyn BlobStore) -> Result<Vec<Checkpoint>, PersistError> {
    Ok(load_json(store, CHECKPOINTS_BLOB)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::SystemTime;

    use tether_types::{ChatTurn, Checkpoint, FileSnapshot};

    use super::{
        BlobStore, FileBlobStore, MemoryBlobStore, PersistError, load_checkpoints, load_turns,
        save_checkpoints, save_turns,
    };

    #[test]
    fn file_store_persists_turns_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("session"));
        let t = SystemTime::UNIX_EPOCH;

        let turns = vec![ChatTurn::user("hi", t), ChatTurn::assistant("hello", t)];
        let mut checkpoint = Checkpoint::new(0, "hi", t);
        checkpoint.record_snapshot(FileSnapshot::new(PathBuf::from("/a"), None, true));
        save_turns(&store, &turns).unwrap();
        save_checkpoints(&store, &[checkpoint.clone()]).unwrap();

        assert_eq!(load_turns(&store).unwrap(), turns);
        assert_eq!(load_checkpoints(&store).unwrap(), vec![checkpoint]);
    }

    #[test]
    fn missing_blobs_load_empty() {
        let store = MemoryBlobStore::new();
        assert!(load_turns(&store).unwrap().is_empty());
        assert!(load_checkpoints(&store).unwrap().is_empty());
    }

    #[test]
    fn corrupt_blob_is_a_serialize_error() {
        let store = MemoryBlobStore::new();
        store.save(super::TURNS_BLOB, b"{not json").unwrap();
        assert!(matches!(
            load_turns(&store),
            Err(PersistError::Serialize { .. })
        ));
    }
}
