//! Direct message storage

use crate::error::SyncError;
use crate::types::DirectMessage;
use redb::{ReadableTable, TableDefinition};

use super::{from_json, to_json, Storage};

/// Table for direct messages (key: envelope id, value: JSON DirectMessage)
pub(crate) const DIRECT_MESSAGES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("direct_messages");

impl Storage {
    /// Save a direct message. Saving the same envelope id twice is a no-op overwrite.
    pub fn save_direct_message(&self, message: &DirectMessage) -> Result<(), SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(DIRECT_MESSAGES_TABLE)?;
            let data = to_json(message)?;
            table.insert(message.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List direct messages exchanged with `peer` (or all when `None`), oldest first.
    pub fn list_direct_messages(&self, peer: Option<&str>) -> Result<Vec<DirectMessage>, SyncError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(DIRECT_MESSAGES_TABLE)?;

        let mut messages = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let message: DirectMessage = from_json(value.value())?;
            let matches = match peer {
                Some(p) => message.from == p || message.to == p,
                None => true,
            };
            if matches {
                messages.push(message);
            }
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}
