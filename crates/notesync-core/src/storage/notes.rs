//! Note Storage - CRUD operations for notes
//!
//! Stores notes as JSON in redb with the note id as the key.

use crate::error::SyncError;
use crate::types::Note;
use redb::{ReadableTable, TableDefinition};

use super::{from_json, to_json, Storage};

/// Table for storing notes (key: note id, value: JSON Note)
pub(crate) const NOTES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("notes");

impl Storage {
    /// Save a note, overwriting any existing note with the same id.
    pub fn save_note(&self, note: &Note) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTES_TABLE)?;
            let data = to_json(note)?;
            table.insert(note.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a note by id.
    ///
    /// Returns `None` if no note exists with the given id.
    pub fn load_note(&self, note_id: &str) -> Result<Option<Note>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(NOTES_TABLE)?;

        match table.get(note_id)? {
            Some(v) => Ok(Some(from_json(v.value())?)),
            None => Ok(None),
        }
    }

    /// Delete a note by id.
    ///
    /// Returns `true` if a note was removed.
    pub fn delete_note(&self, note_id: &str) -> Result<bool, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(NOTES_TABLE)?;
            let removed = table.remove(note_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// List all notes, most recently updated first.
    pub fn list_notes(&self) -> Result<Vec<Note>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(NOTES_TABLE)?;

        let mut notes = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let note: Note = from_json(value.value())?;
            notes.push(note);
        }
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }
}
