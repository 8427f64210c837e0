//! Ontology singleton and sync metadata (needs-sync flag, watermark)

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition};

use crate::error::SyncError;
use crate::types::Ontology;

use super::{from_json, to_json, Storage};

/// Table holding the single ontology record
pub(crate) const ONTOLOGY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ontology");

/// Table for sync bookkeeping values
pub(crate) const SYNC_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_meta");

const ONTOLOGY_KEY: &str = "current";
const NEEDS_SYNC_KEY: &str = "ontology_needs_sync";
const LAST_SYNCED_AT_KEY: &str = "last_synced_at";
const DATA_OWNER_KEY: &str = "data_owner";

impl Storage {
    /// Save the ontology tree.
    pub fn save_ontology(&self, ontology: &Ontology) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(ONTOLOGY_TABLE)?;
            let data = to_json(ontology)?;
            table.insert(ONTOLOGY_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the ontology tree, if one has been saved.
    pub fn load_ontology(&self) -> Result<Option<Ontology>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(ONTOLOGY_TABLE)?;

        match table.get(ONTOLOGY_KEY)? {
            Some(v) => Ok(Some(from_json(v.value())?)),
            None => Ok(None),
        }
    }

    /// Mark (or unmark) the ontology as changed locally since the last publish.
    pub fn set_ontology_needs_sync(&self, needs_sync: bool) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_META_TABLE)?;
            if needs_sync {
                table.insert(NEEDS_SYNC_KEY, [1u8].as_slice())?;
            } else {
                table.remove(NEEDS_SYNC_KEY)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Whether the ontology changed locally since the last publish.
    pub fn ontology_needs_sync(&self) -> Result<bool, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SYNC_META_TABLE)?;
        let flag = table.get(NEEDS_SYNC_KEY)?.is_some();
        Ok(flag)
    }

    /// Record the sync watermark.
    pub fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_META_TABLE)?;
            let data = to_json(&at)?;
            table.insert(LAST_SYNCED_AT_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The sync watermark, if a cycle has ever completed.
    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SYNC_META_TABLE)?;

        match table.get(LAST_SYNCED_AT_KEY)? {
            Some(v) => Ok(Some(from_json(v.value())?)),
            None => Ok(None),
        }
    }

    /// Record which public key the local notes, queue and watermark belong to.
    pub fn set_data_owner(&self, public_hex: &str) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_META_TABLE)?;
            table.insert(DATA_OWNER_KEY, public_hex.as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Public key the local data belongs to, if any identity has claimed it.
    pub fn data_owner(&self) -> Result<Option<String>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SYNC_META_TABLE)?;

        match table.get(DATA_OWNER_KEY)? {
            Some(v) => String::from_utf8(v.value().to_vec())
                .map(Some)
                .map_err(|e| SyncError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}
