//! Local deletion records
//!
//! A tombstone remembers when a note was deleted on this device so that a
//! stale copy still sitting on a relay is not merged back in.

use crate::error::SyncError;
use crate::types::Tombstone;
use redb::{ReadableTable, TableDefinition};

use super::{from_json, to_json, Storage};

/// Table for local tombstones (key: note id, value: JSON Tombstone)
pub(crate) const TOMBSTONES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("tombstones");

impl Storage {
    /// Record a local deletion.
    pub fn save_tombstone(&self, tombstone: &Tombstone) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(TOMBSTONES_TABLE)?;
            let data = to_json(tombstone)?;
            table.insert(tombstone.note_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the deletion record for a note.
    pub fn load_tombstone(&self, note_id: &str) -> Result<Option<Tombstone>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(TOMBSTONES_TABLE)?;

        match table.get(note_id)? {
            Some(v) => Ok(Some(from_json(v.value())?)),
            None => Ok(None),
        }
    }

    /// Forget a deletion record (the note was recreated or superseded).
    pub fn remove_tombstone(&self, note_id: &str) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(TOMBSTONES_TABLE)?;
            table.remove(note_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
