//! Durable pending-mutation queue
//!
//! At most one entry per entity. A new `Save` replaces whatever was there;
//! a `Delete` replaces it too but keeps the last known remote envelope id so
//! the deletion can still be tombstoned.

use chrono::Utc;
use tracing::debug;

use crate::error::SyncResult;
use crate::storage::Storage;
use crate::types::{QueueAction, QueueEntry};

#[derive(Clone)]
pub struct MutationQueue {
    storage: Storage,
}

impl MutationQueue {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Queue a save, replacing any pending entry for `entity_id`.
    pub fn enqueue_save(&self, entity_id: &str) -> SyncResult<()> {
        let entry = QueueEntry {
            entity_id: entity_id.to_string(),
            action: QueueAction::Save,
            queued_at: Utc::now(),
            remote_event_id: None,
        };
        self.storage.put_queue_entry(&entry)?;
        debug!(entity_id, "Queued save");
        Ok(())
    }

    /// Queue a delete. An absent `remote_event_id` keeps the one already
    /// recorded on the pending entry, if any.
    pub fn enqueue_delete(&self, entity_id: &str, remote_event_id: Option<String>) -> SyncResult<()> {
        let previous = self.storage.load_queue_entry(entity_id)?;
        let remote_event_id =
            remote_event_id.or_else(|| previous.and_then(|p| p.remote_event_id));
        let entry = QueueEntry {
            entity_id: entity_id.to_string(),
            action: QueueAction::Delete,
            queued_at: Utc::now(),
            remote_event_id,
        };
        self.storage.put_queue_entry(&entry)?;
        debug!(entity_id, has_remote = entry.remote_event_id.is_some(), "Queued delete");
        Ok(())
    }

    /// Pending entries, oldest first
    pub fn pending(&self) -> SyncResult<Vec<QueueEntry>> {
        self.storage.list_queue_entries()
    }

    pub fn get(&self, entity_id: &str) -> SyncResult<Option<QueueEntry>> {
        self.storage.load_queue_entry(entity_id)
    }

    pub fn remove(&self, entity_id: &str) -> SyncResult<()> {
        self.storage.remove_queue_entry(entity_id)
    }

    /// Remove `entry` only if it is still the pending entry for its entity,
    /// so a mutation queued while `entry` was being pushed is not lost.
    pub fn remove_if_unchanged(&self, entry: &QueueEntry) -> SyncResult<bool> {
        match self.get(&entry.entity_id)? {
            Some(current) if current == *entry => {
                self.remove(&entry.entity_id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether `entity_id` has a pending save.
    pub fn has_pending_save(&self, entity_id: &str) -> SyncResult<bool> {
        Ok(matches!(
            self.get(entity_id)?,
            Some(QueueEntry {
                action: QueueAction::Save,
                ..
            })
        ))
    }
}
