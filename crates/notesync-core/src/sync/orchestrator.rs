//! The sync cycle
//!
//! ```text
//! run_cycle(force_full_resync)
//!   ├── preconditions: identity loaded, relays reachable, no cycle in flight
//!   ├── 1. ontology: last-write-wins on updated_at
//!   ├── 2. notes: fetch own self-sync notes + tombstones, merge newer copies
//!   ├── 3. queue: push pending saves and deletes
//!   └── 4. watermark: last_synced_at = cycle start
//! ```
//!
//! Item-level failures (undecryptable or malformed envelopes, rejected
//! publishes) are recorded in the [`SyncReport`] and never abort the cycle.
//! Store errors and whole-transport failures do.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{OntologyOutcome, SyncEvent, SyncReport, SyncStatus};
use super::queue::MutationQueue;
use crate::error::{SyncError, SyncResult};
use crate::event::{
    unix_seconds, DecodedEvent, Envelope, EventCodec, EventKind, Filter, SelfNote, ONTOLOGY_D_TAG,
    TOMBSTONE_REASON,
};
use crate::identity::KeyStore;
use crate::relay::RelayPool;
use crate::storage::Storage;
use crate::types::{Ontology, QueueAction, QueueEntry};

/// Capacity of the sync event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Clears the in-progress flag on every exit path.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Strip scripts and other active content from note HTML that came off the network.
pub fn sanitize_html(content: &str) -> String {
    ammonia::clean(content)
}

/// Drives reconciliation between the local store and the relays.
pub struct SyncOrchestrator {
    storage: Storage,
    keystore: Arc<KeyStore>,
    pool: Arc<RelayPool>,
    queue: MutationQueue,
    ontology: RwLock<Option<Ontology>>,
    in_progress: AtomicBool,
    status: RwLock<SyncStatus>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        storage: Storage,
        keystore: Arc<KeyStore>,
        pool: Arc<RelayPool>,
        queue: MutationQueue,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            keystore,
            pool,
            queue,
            ontology: RwLock::new(None),
            in_progress: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::Idle),
            event_tx,
        }
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Current ontology: memory, then store, then an empty tree.
    pub fn ontology(&self) -> SyncResult<Ontology> {
        if let Some(cached) = self.ontology.read().clone() {
            return Ok(cached);
        }
        let loaded = self.storage.load_ontology()?;
        if let Some(ontology) = &loaded {
            *self.ontology.write() = Some(ontology.clone());
        }
        Ok(loaded.unwrap_or_default())
    }

    /// Replace the local ontology, stamp it, and flag it for publishing.
    pub fn update_ontology(&self, mut ontology: Ontology) -> SyncResult<Ontology> {
        ontology.updated_at = Utc::now();
        self.storage.save_ontology(&ontology)?;
        self.storage.set_ontology_needs_sync(true)?;
        *self.ontology.write() = Some(ontology.clone());
        debug!(nodes = ontology.nodes.len(), "Ontology updated locally");
        Ok(ontology)
    }

    /// Forget cached state belonging to the previous identity.
    pub fn reset_cache(&self) {
        *self.ontology.write() = None;
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Run one sync cycle.
    ///
    /// With `force_full_resync` the note fetch ignores the watermark.
    pub async fn run_cycle(&self, force_full_resync: bool) -> SyncResult<SyncReport> {
        let keypair = self.keystore.require()?;
        if !self.pool.is_online() {
            return Err(SyncError::Offline(
                "no reachable relay configured".to_string(),
            ));
        }
        let _guard = CycleGuard::acquire(&self.in_progress)?;

        *self.status.write() = SyncStatus::Syncing;
        self.emit(SyncEvent::CycleStarted {
            full_resync: force_full_resync,
        });
        info!(full_resync = force_full_resync, "Sync cycle started");

        let codec = EventCodec::new(keypair);
        let mut report = SyncReport::new(Utc::now(), force_full_resync);

        let outcome = self.run_steps(&codec, &mut report).await;
        match outcome {
            Ok(()) => {
                *self.status.write() = SyncStatus::Idle;
                info!(
                    updated = report.notes_updated.len(),
                    removed = report.notes_removed.len(),
                    published = report.notes_published.len(),
                    tombstoned = report.notes_tombstoned.len(),
                    failures = report.failures.len(),
                    "Sync cycle completed"
                );
                self.emit(SyncEvent::CycleCompleted {
                    report: Box::new(report.clone()),
                });
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Sync cycle failed");
                *self.status.write() = SyncStatus::Error(e.to_string());
                self.emit(SyncEvent::CycleFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_steps(&self, codec: &EventCodec, report: &mut SyncReport) -> SyncResult<()> {
        self.reconcile_ontology(codec, report).await?;
        self.merge_notes(codec, report).await?;
        self.drain_queue(codec, report).await?;
        self.storage.set_last_synced_at(report.started_at)?;
        debug!(watermark = %report.started_at, "Watermark advanced");
        Ok(())
    }

    async fn reconcile_ontology(
        &self,
        codec: &EventCodec,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let filter = Filter::new()
            .kind(EventKind::Ontology)
            .author(codec.public_key())
            .d_tag(ONTOLOGY_D_TAG);
        let envelopes = self.pool.query(&[filter]).await?;

        let mut remote: Option<Ontology> = None;
        for envelope in &envelopes {
            match codec.decode(envelope) {
                Ok(DecodedEvent::Ontology(candidate)) => {
                    if remote
                        .as_ref()
                        .map_or(true, |r| candidate.updated_at > r.updated_at)
                    {
                        remote = Some(candidate);
                    }
                }
                Ok(_) => report.fail(&envelope.id, "not an ontology envelope"),
                Err(e) => {
                    warn!(id = %envelope.id, error = %e, "Skipping ontology envelope");
                    report.fail(&envelope.id, e);
                }
            }
        }

        let local = match self.ontology.read().clone() {
            Some(cached) => Some(cached),
            None => self.storage.load_ontology()?,
        };

        match (local, remote) {
            (None, None) => {}
            (Some(local), remote)
                if remote
                    .as_ref()
                    .map_or(true, |r| local.updated_at > r.updated_at) =>
            {
                let envelope = codec.encode_ontology(&local)?;
                let published = self.pool.publish(&envelope).await?;
                if published.any_accepted() {
                    self.storage.set_ontology_needs_sync(false)?;
                    report.ontology = OntologyOutcome::Published;
                    info!("Local ontology published");
                } else {
                    report.ontology = OntologyOutcome::PublishFailed;
                    report.fail(
                        "ontology",
                        SyncError::PublishFailure(published.failure_summary()),
                    );
                }
            }
            (local, Some(remote))
                if local
                    .as_ref()
                    .map_or(true, |l| remote.updated_at > l.updated_at) =>
            {
                self.storage.save_ontology(&remote)?;
                self.storage.set_ontology_needs_sync(false)?;
                *self.ontology.write() = Some(remote);
                report.ontology = OntologyOutcome::Replaced;
                self.emit(SyncEvent::OntologyReplaced);
                info!("Remote ontology replaced local copy");
            }
            _ => debug!("Ontology up to date"),
        }
        Ok(())
    }

    async fn merge_notes(&self, codec: &EventCodec, report: &mut SyncReport) -> SyncResult<()> {
        let me = codec.public_key();
        let since = if report.full_resync {
            None
        } else {
            self.storage.last_synced_at()?.map(unix_seconds)
        };

        let filters = [
            Filter::new()
                .kind(EventKind::EncryptedDirect)
                .author(me.clone())
                .p_tag(me.clone())
                .since(since),
            Filter::new()
                .kind(EventKind::Deletion)
                .author(me.clone())
                .since(since),
        ];
        let envelopes = self.pool.query(&filters).await?;
        debug!(count = envelopes.len(), ?since, "Fetched own envelopes");

        let mut cited: HashSet<String> = HashSet::new();
        let mut newest: BTreeMap<String, SelfNote> = BTreeMap::new();

        for envelope in &envelopes {
            match codec.decode(envelope) {
                Ok(DecodedEvent::Deletion(deletion)) if deletion.author == me => {
                    cited.extend(deletion.targets);
                }
                Ok(DecodedEvent::SelfNote(candidate)) => {
                    let replace = newest.get(&candidate.note.id).map_or(true, |kept| {
                        // created_at has whole-second resolution
                        (candidate.created_at, candidate.note.updated_at, &candidate.event_id)
                            > (kept.created_at, kept.note.updated_at, &kept.event_id)
                    });
                    if replace {
                        newest.insert(candidate.note.id.clone(), candidate);
                    }
                }
                Ok(_) => debug!(id = %envelope.id, "Ignoring non-note envelope"),
                Err(e) => {
                    warn!(id = %envelope.id, error = %e, "Skipping undecodable envelope");
                    report.fail(&envelope.id, e);
                }
            }
        }

        if !cited.is_empty() {
            self.remove_tombstoned(&cited, report)?;
        }

        for (note_id, candidate) in newest {
            if cited.contains(&candidate.event_id) {
                debug!(%note_id, "Newest copy was tombstoned remotely");
                continue;
            }
            self.merge_one(candidate, report)?;
        }
        Ok(())
    }

    /// Remove local notes whose last synced envelope was tombstoned elsewhere.
    fn remove_tombstoned(&self, cited: &HashSet<String>, report: &mut SyncReport) -> SyncResult<()> {
        for note in self.storage.list_notes()? {
            let Some(event_id) = note.sync_event_id.as_deref() else {
                continue;
            };
            if !cited.contains(event_id) || self.queue.has_pending_save(&note.id)? {
                continue;
            }
            self.storage.delete_note(&note.id)?;
            info!(note_id = %note.id, "Note removed by remote tombstone");
            self.emit(SyncEvent::NoteRemoved {
                note_id: note.id.clone(),
            });
            report.notes_removed.push(note.id);
        }
        Ok(())
    }

    fn merge_one(&self, candidate: SelfNote, report: &mut SyncReport) -> SyncResult<()> {
        let SelfNote {
            mut note, event_id, ..
        } = candidate;

        if let Some(tombstone) = self.storage.load_tombstone(&note.id)? {
            if note.updated_at <= tombstone.deleted_at {
                debug!(note_id = %note.id, "Stale remote copy of deleted note suppressed");
                report.notes_suppressed.push(note.id);
                return Ok(());
            }
            self.storage.remove_tombstone(&note.id)?;
        }

        if let Some(local) = self.storage.load_note(&note.id)? {
            if note.updated_at <= local.updated_at {
                return Ok(());
            }
        }

        note.content = sanitize_html(&note.content);
        note.sync_event_id = Some(event_id);
        self.storage.save_note(&note)?;
        if self.queue.has_pending_save(&note.id)? {
            // superseded by the newer remote copy
            self.queue.remove(&note.id)?;
        }

        debug!(note_id = %note.id, "Remote copy merged");
        self.emit(SyncEvent::NoteUpdated {
            note_id: note.id.clone(),
        });
        report.notes_updated.push(note.id);
        Ok(())
    }

    async fn drain_queue(&self, codec: &EventCodec, report: &mut SyncReport) -> SyncResult<()> {
        let pending = self.queue.pending()?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Draining mutation queue");
        }

        for entry in pending {
            match entry.action {
                QueueAction::Save => self.push_save(codec, &entry, report).await?,
                QueueAction::Delete => self.push_delete(codec, &entry, report).await?,
            }
        }
        Ok(())
    }

    async fn push_save(
        &self,
        codec: &EventCodec,
        entry: &QueueEntry,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let Some(note) = self.storage.load_note(&entry.entity_id)? else {
            debug!(note_id = %entry.entity_id, "Queued save for missing note dropped");
            self.queue.remove_if_unchanged(entry)?;
            return Ok(());
        };

        let envelope = match codec.encode_self_note(&note) {
            Ok(envelope) => envelope,
            Err(e) if e.is_item_level() => {
                report.fail(&entry.entity_id, e);
                report.still_queued.push(entry.entity_id.clone());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !self.publish_or_keep(&envelope, entry, report).await? {
            return Ok(());
        }

        // reload so an edit made during the publish is not overwritten
        if let Some(mut current) = self.storage.load_note(&entry.entity_id)? {
            current.sync_event_id = Some(envelope.id.clone());
            self.storage.save_note(&current)?;
        }
        self.queue.remove_if_unchanged(entry)?;
        debug!(note_id = %entry.entity_id, event_id = %envelope.id, "Note published");
        report.notes_published.push(entry.entity_id.clone());
        Ok(())
    }

    async fn push_delete(
        &self,
        codec: &EventCodec,
        entry: &QueueEntry,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let Some(remote_event_id) = entry.remote_event_id.clone() else {
            debug!(note_id = %entry.entity_id, "Delete of never-synced note dropped");
            self.queue.remove_if_unchanged(entry)?;
            return Ok(());
        };

        let envelope = codec.encode_tombstone(&[remote_event_id], TOMBSTONE_REASON)?;
        if !self.publish_or_keep(&envelope, entry, report).await? {
            return Ok(());
        }

        if let Some(mut tombstone) = self.storage.load_tombstone(&entry.entity_id)? {
            tombstone.remote_event_id = Some(envelope.id.clone());
            self.storage.save_tombstone(&tombstone)?;
        }
        self.queue.remove_if_unchanged(entry)?;
        debug!(note_id = %entry.entity_id, event_id = %envelope.id, "Tombstone published");
        report.notes_tombstoned.push(entry.entity_id.clone());
        Ok(())
    }

    /// Publish; on total rejection record a `PublishFailure` and leave the entry queued.
    async fn publish_or_keep(
        &self,
        envelope: &Envelope,
        entry: &QueueEntry,
        report: &mut SyncReport,
    ) -> SyncResult<bool> {
        let published = self.pool.publish(envelope).await?;
        if published.any_accepted() {
            return Ok(true);
        }
        warn!(entity_id = %entry.entity_id, "No relay accepted queued mutation");
        report.fail(
            &entry.entity_id,
            SyncError::PublishFailure(published.failure_summary()),
        );
        report.still_queued.push(entry.entity_id.clone());
        Ok(false)
    }

    /// Watermark of the last completed cycle
    pub fn last_synced_at(&self) -> SyncResult<Option<DateTime<Utc>>> {
        self.storage.last_synced_at()
    }
}
