//! Persistent storage using redb.
//!
//! One table per partition:
//! - Notes
//! - The ontology singleton
//! - Identity keys
//! - Direct messages
//! - The mutation queue
//! - Sync metadata (needs-sync flag, watermark)
//! - Local deletion tombstones
//!
//! Every write is its own transaction, so a single key write is atomic.

use crate::error::SyncError;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

// Submodules
mod messages;
mod meta;
mod notes;
mod queue;
mod tombstones;

use messages::DIRECT_MESSAGES_TABLE;
use meta::{ONTOLOGY_TABLE, SYNC_META_TABLE};
use notes::NOTES_TABLE;
use queue::SYNC_QUEUE_TABLE;
use tombstones::TOMBSTONES_TABLE;

const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Get a reference to the shared database handle
    pub fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(NOTES_TABLE)?;
            let _ = write_txn.open_table(ONTOLOGY_TABLE)?;
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
            let _ = write_txn.open_table(DIRECT_MESSAGES_TABLE)?;
            let _ = write_txn.open_table(SYNC_QUEUE_TABLE)?;
            let _ = write_txn.open_table(SYNC_META_TABLE)?;
            let _ = write_txn.open_table(TOMBSTONES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity Operations
    // ═══════════════════════════════════════════════════════════════════════

    const PRIVATE_KEY: &'static str = "private_key";
    const PUBLIC_KEY: &'static str = "public_key";

    /// Save both identity keys in a single transaction.
    pub fn save_identity_keys(&self, private_hex: &str, public_hex: &str) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            table.insert(Self::PRIVATE_KEY, private_hex.as_bytes())?;
            table.insert(Self::PUBLIC_KEY, public_hex.as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the identity keys as `(private_hex, public_hex)`.
    ///
    /// Returns `None` unless both keys are present.
    pub fn load_identity_keys(&self) -> Result<Option<(String, String)>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        let read = |key: &str| -> Result<Option<String>, SyncError> {
            match table.get(key)? {
                Some(v) => String::from_utf8(v.value().to_vec())
                    .map(Some)
                    .map_err(|e| SyncError::Serialization(e.to_string())),
                None => Ok(None),
            }
        };

        match (read(Self::PRIVATE_KEY)?, read(Self::PUBLIC_KEY)?) {
            (Some(private_hex), Some(public_hex)) => Ok(Some((private_hex, public_hex))),
            _ => Ok(None),
        }
    }

    /// Remove both identity keys in a single transaction.
    pub fn clear_identity_keys(&self) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            table.remove(Self::PRIVATE_KEY)?;
            table.remove(Self::PUBLIC_KEY)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl Storage {
    /// Remove everything except the identity keys: notes, ontology, direct
    /// messages, the mutation queue, tombstones and sync metadata.
    ///
    /// One write transaction, so a crash leaves either all or none of it.
    pub fn clear_account_data(&self) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(NOTES_TABLE)?.retain(|_, _| false)?;
            write_txn.open_table(ONTOLOGY_TABLE)?.retain(|_, _| false)?;
            write_txn.open_table(DIRECT_MESSAGES_TABLE)?.retain(|_, _| false)?;
            write_txn.open_table(SYNC_QUEUE_TABLE)?.retain(|_, _| false)?;
            write_txn.open_table(TOMBSTONES_TABLE)?.retain(|_, _| false)?;
            write_txn.open_table(SYNC_META_TABLE)?.retain(|_, _| false)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(value).map_err(|e| SyncError::Serialization(e.to_string()))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    serde_json::from_slice(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}

#[cfg(test)]
pub(crate) fn create_test_storage() -> (Storage, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.redb");
    let storage = Storage::new(&db_path).unwrap();
    (storage, temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_identity_keys_roundtrip() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.load_identity_keys().unwrap().is_none());

        storage.save_identity_keys("aa", "bb").unwrap();
        assert_eq!(
            storage.load_identity_keys().unwrap(),
            Some(("aa".to_string(), "bb".to_string()))
        );

        storage.clear_identity_keys().unwrap();
        assert!(storage.load_identity_keys().unwrap().is_none());
    }

    #[test]
    fn test_clear_account_data_keeps_identity() {
        use crate::types::{Note, Ontology, QueueAction, QueueEntry, Tombstone};
        use chrono::Utc;

        let (storage, _temp) = create_test_storage();
        storage.save_identity_keys("aa", "bb").unwrap();
        let note = Note::new("kept?", "no");
        storage.save_note(&note).unwrap();
        storage.save_ontology(&Ontology::new()).unwrap();
        storage.set_ontology_needs_sync(true).unwrap();
        storage.set_last_synced_at(Utc::now()).unwrap();
        storage.set_data_owner("bb").unwrap();
        storage
            .put_queue_entry(&QueueEntry {
                entity_id: note.id.clone(),
                action: QueueAction::Save,
                queued_at: Utc::now(),
                remote_event_id: None,
            })
            .unwrap();
        storage
            .save_tombstone(&Tombstone {
                note_id: "gone".to_string(),
                deleted_at: Utc::now(),
                remote_event_id: None,
            })
            .unwrap();

        storage.clear_account_data().unwrap();

        assert!(storage.list_notes().unwrap().is_empty());
        assert!(storage.load_ontology().unwrap().is_none());
        assert!(!storage.ontology_needs_sync().unwrap());
        assert!(storage.last_synced_at().unwrap().is_none());
        assert!(storage.data_owner().unwrap().is_none());
        assert!(storage.list_queue_entries().unwrap().is_empty());
        assert!(storage.load_tombstone("gone").unwrap().is_none());
        assert!(storage.load_identity_keys().unwrap().is_some());
    }

    #[test]
    fn test_identity_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        {
            let storage = Storage::new(&db_path).unwrap();
            storage.save_identity_keys("11", "22").unwrap();
        }
        let storage = Storage::new(&db_path).unwrap();
        assert!(storage.load_identity_keys().unwrap().is_some());
    }
}
