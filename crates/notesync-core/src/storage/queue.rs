//! Mutation queue partition
//!
//! Keyed by entity id, which gives the at-most-one-entry-per-entity shape
//! for free. Collapsing rules live in [`crate::sync::MutationQueue`].

use crate::error::SyncError;
use crate::types::QueueEntry;
use redb::{ReadableTable, TableDefinition};

use super::{from_json, to_json, Storage};

/// Table for pending mutations (key: entity id, value: JSON QueueEntry)
pub(crate) const SYNC_QUEUE_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("sync_queue");

impl Storage {
    /// Insert or replace the queue entry for `entry.entity_id`.
    pub fn put_queue_entry(&self, entry: &QueueEntry) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_QUEUE_TABLE)?;
            let data = to_json(entry)?;
            table.insert(entry.entity_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the queue entry for an entity.
    pub fn load_queue_entry(&self, entity_id: &str) -> Result<Option<QueueEntry>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SYNC_QUEUE_TABLE)?;

        match table.get(entity_id)? {
            Some(v) => Ok(Some(from_json(v.value())?)),
            None => Ok(None),
        }
    }

    /// Remove the queue entry for an entity.
    pub fn remove_queue_entry(&self, entity_id: &str) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_QUEUE_TABLE)?;
            table.remove(entity_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All queue entries, oldest first.
    pub fn list_queue_entries(&self) -> Result<Vec<QueueEntry>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(SYNC_QUEUE_TABLE)?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let queued: QueueEntry = from_json(value.value())?;
            entries.push(queued);
        }
        entries.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(entries)
    }
}
