//! Persisted record of which messages have become calendar events.
//!
//! The store is a JSON snapshot that is read once at startup and rewritten
//! with write-to-temp-then-rename, so a crash mid-write leaves the previous
//! snapshot intact. The sync cursor is derived from the records and never
//! stored on its own.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DeadLetter, MessageId, ProcessedRecord};

/// Snapshot format version written by this build.
const SNAPSHOT_VERSION: u32 = 1;

/// Errors that can occur during sync store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file exists but cannot be trusted.
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Reading or writing the state file failed.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded.
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A message was recorded twice. Indicates a sequencing bug.
    #[error("message {0} is already recorded")]
    DuplicateKey(MessageId),
}

/// Result type for sync store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk representation of the store.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<ProcessedRecord>,
    #[serde(default)]
    dead_letters: BTreeMap<MessageId, DeadLetter>,
}

/// Mapping of processed message ids to their outcome records.
#[derive(Debug)]
pub struct SyncStore {
    path: PathBuf,
    records: BTreeMap<MessageId, ProcessedRecord>,
    dead_letters: BTreeMap<MessageId, DeadLetter>,
    dirty: bool,
}

impl SyncStore {
    /// Creates an empty store that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
            dead_letters: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Loads the store from `path`.
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// read or parsed is [`StoreError::Corrupt`]: continuing with an empty
    /// store would recreate every event.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No sync state yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    reason: format!("unreadable: {}", e),
                    path,
                })
            }
        };

        let snapshot: Snapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Err(StoreError::Corrupt {
                    reason: e.to_string(),
                    path,
                })
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt {
                reason: format!("unsupported version {}", snapshot.version),
                path,
            });
        }

        let mut records = BTreeMap::new();
        for record in snapshot.records {
            let id = record.message_id.clone();
            if records.insert(id.clone(), record).is_some() {
                return Err(StoreError::Corrupt {
                    reason: format!("message {} recorded twice", id),
                    path,
                });
            }
        }

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            dead_letters = snapshot.dead_letters.len(),
            "Loaded sync state"
        );

        Ok(Self {
            path,
            records,
            dead_letters: snapshot.dead_letters,
            dirty: false,
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the latest message time across all records.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.records.values().map(|r| r.message_time).max()
    }

    /// Returns whether `message_id` has a processed record.
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.records.contains_key(message_id)
    }

    /// Returns whether `message_id` was set aside after a failed extraction.
    pub fn is_dead_letter(&self, message_id: &MessageId) -> bool {
        self.dead_letters.contains_key(message_id)
    }

    /// Returns whether `message_id` was already handled in an earlier pass.
    pub fn is_known(&self, message_id: &MessageId) -> bool {
        self.contains(message_id) || self.is_dead_letter(message_id)
    }

    /// Adds a processed record.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the message is already
    /// recorded; existing records are never overwritten.
    pub fn record(&mut self, record: ProcessedRecord) -> Result<()> {
        if self.records.contains_key(&record.message_id) {
            return Err(StoreError::DuplicateKey(record.message_id));
        }
        self.records.insert(record.message_id.clone(), record);
        self.dirty = true;
        Ok(())
    }

    /// Sets a message aside after a failed extraction.
    ///
    /// Returns false if it was already set aside.
    pub fn dead_letter(&mut self, message_id: MessageId, letter: DeadLetter) -> bool {
        if self.dead_letters.contains_key(&message_id) {
            return false;
        }
        self.dead_letters.insert(message_id, letter);
        self.dirty = true;
        true
    }

    /// Returns the processed record for `message_id`.
    pub fn get(&self, message_id: &MessageId) -> Option<&ProcessedRecord> {
        self.records.get(message_id)
    }

    /// Iterates over processed records ordered by message id.
    pub fn records(&self) -> impl Iterator<Item = &ProcessedRecord> {
        self.records.values()
    }

    /// Iterates over dead-lettered messages ordered by message id.
    pub fn dead_letters(&self) -> impl Iterator<Item = (&MessageId, &DeadLetter)> {
        self.dead_letters.iter()
    }

    /// Returns the number of processed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing has been processed yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns whether there are changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Durably writes the store, atomically replacing the previous snapshot.
    ///
    /// A no-op when nothing changed since the last write.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            records: self.records.values().cloned().collect(),
            dead_letters: self.dead_letters.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let io_err = |path: &Path, source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp = PathBuf::from(temp_name);

        let mut file = std::fs::File::create(&temp).map_err(|e| io_err(&temp, e))?;
        file.write_all(&json).map_err(|e| io_err(&temp, e))?;
        file.sync_all().map_err(|e| io_err(&temp, e))?;
        drop(file);

        std::fs::rename(&temp, &self.path).map_err(|e| io_err(&self.path, e))?;
        sync_parent_dir(&self.path).map_err(|e| io_err(&self.path, e))?;

        self.dirty = false;
        tracing::debug!(
            path = %self.path.display(),
            records = self.records.len(),
            "Persisted sync state"
        );
        Ok(())
    }
}

/// Flushes the directory entry of `path` so a completed rename survives a crash.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
