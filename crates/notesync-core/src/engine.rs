//! NoteSyncEngine - the caller-facing entry point
//!
//! NoteSyncEngine owns and wires together:
//! - Storage (redb) and the TOML config in the data directory
//! - KeyStore (identity)
//! - RelayPool (transport)
//! - SyncOrchestrator and MutationQueue (reconciliation)
//! - LiveFeeds (direct messages and topics)
//!
//! # Example
//!
//! ```ignore
//! use notesync_core::{Note, NoteSyncEngine};
//!
//! let engine = NoteSyncEngine::new("~/.notesync").await?;
//! engine.generate_or_import_identity(None)?;
//!
//! let note = engine.save_note(Note::new("Groceries", "milk, eggs"))?;
//! let report = engine.run_sync_cycle(false).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{SyncConfig, CONFIG_FILE_NAME};
use crate::error::{SyncError, SyncResult};
use crate::event::EventCodec;
use crate::feeds::LiveFeeds;
use crate::identity::{KeyStore, Keypair};
use crate::relay::{ws_clients, PublishReport, RelayClient, RelayPool, SubscriptionHandle};
use crate::storage::Storage;
use crate::sync::{MutationQueue, SyncEvent, SyncOrchestrator, SyncReport, SyncStatus};
use crate::types::{DirectMessage, Note, Ontology, PublicNote, QueueEntry, Tombstone};

/// File name of the database inside the data directory
pub const DATABASE_FILE_NAME: &str = "notesync.redb";

pub struct NoteSyncEngine {
    storage: Storage,
    data_dir: PathBuf,
    config: RwLock<SyncConfig>,
    /// false when the caller supplied its own relay clients
    relays_from_config: bool,
    keystore: Arc<KeyStore>,
    pool: Arc<RelayPool>,
    queue: MutationQueue,
    orchestrator: SyncOrchestrator,
    feeds: LiveFeeds,
}

impl NoteSyncEngine {
    /// Open (or create) the engine in `data_dir`, connecting to the relays
    /// listed in its config file.
    ///
    /// A stored identity is loaded if present.
    pub async fn new(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        Self::open(data_dir.as_ref(), None)
    }

    /// Like [`NoteSyncEngine::new`] but talking to the given relay clients
    /// instead of the configured WebSocket endpoints.
    pub async fn with_relay_clients(
        data_dir: impl AsRef<Path>,
        clients: Vec<Arc<dyn RelayClient>>,
    ) -> SyncResult<Self> {
        Self::open(data_dir.as_ref(), Some(clients))
    }

    fn open(data_dir: &Path, clients: Option<Vec<Arc<dyn RelayClient>>>) -> SyncResult<Self> {
        let data_dir = data_dir.to_path_buf();
        info!(?data_dir, "Initializing NoteSyncEngine");
        std::fs::create_dir_all(&data_dir)?;

        let config = SyncConfig::load_or_create(data_dir.join(CONFIG_FILE_NAME))?;
        let storage = Storage::new(data_dir.join(DATABASE_FILE_NAME))?;

        let keystore = Arc::new(KeyStore::new(storage.clone()));
        match keystore.load() {
            Ok(true) => info!("Loaded existing identity"),
            Ok(false) => info!("No identity yet"),
            Err(SyncError::Identity(reason)) => {
                warn!(%reason, "Stored identity unusable, starting logged out")
            }
            Err(e) => return Err(e),
        }

        let relays_from_config = clients.is_none();
        let pool = match clients {
            Some(clients) => RelayPool::new(clients),
            None => RelayPool::new(ws_clients(&config.relays)),
        }
        .with_timeouts(config.publish_timeout(), config.query_timeout());
        let pool = Arc::new(pool);

        let queue = MutationQueue::new(storage.clone());
        let orchestrator = SyncOrchestrator::new(
            storage.clone(),
            keystore.clone(),
            pool.clone(),
            queue.clone(),
        );
        let feeds = LiveFeeds::new(storage.clone(), keystore.clone(), pool.clone());

        Ok(Self {
            storage,
            data_dir,
            config: RwLock::new(config),
            relays_from_config,
            keystore,
            pool,
            queue,
            orchestrator,
            feeds,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════

    /// Generate and persist a fresh identity. Returns the public key.
    pub fn generate_identity(&self) -> SyncResult<String> {
        let keypair = KeyStore::generate()?;
        self.adopt_identity(keypair)
    }

    /// Persist an identity from its hex private key. Returns the public key.
    pub fn import_identity(&self, secret_hex: &str) -> SyncResult<String> {
        let keypair = KeyStore::import(secret_hex)?;
        self.adopt_identity(keypair)
    }

    /// Import `secret_hex` if given, otherwise generate.
    pub fn generate_or_import_identity(&self, secret_hex: Option<&str>) -> SyncResult<String> {
        match secret_hex {
            Some(secret) => self.import_identity(secret),
            None => self.generate_identity(),
        }
    }

    /// Make `keypair` the active identity.
    ///
    /// Local data belongs to the identity that created or synced it. When a
    /// different identity takes over, that data is dropped (unpublished edits
    /// included) so the newcomer starts from an empty store and a full fetch.
    fn adopt_identity(&self, keypair: Keypair) -> SyncResult<String> {
        let public_hex = keypair.public_hex();
        if let Some(current) = self.keystore.public_key() {
            if current != public_hex {
                warn!(old = %current, "Replacing identity");
                self.pool.cancel_all();
                self.feeds.reset();
            }
        }

        match self.storage.data_owner()? {
            Some(owner) if owner != public_hex => {
                let dropped = self.queue.pending()?.len();
                warn!(%owner, dropped_mutations = dropped, "Clearing data of previous identity");
                self.storage.clear_account_data()?;
                self.orchestrator.reset_cache();
            }
            _ => {}
        }

        self.keystore.store(&keypair)?;
        self.storage.set_data_owner(&public_hex)?;
        Ok(public_hex)
    }

    /// Forget the identity and stop every live subscription.
    ///
    /// Local data stays until a different identity logs in.
    pub fn logout(&self) -> SyncResult<()> {
        self.pool.cancel_all();
        self.keystore.clear()?;
        self.feeds.reset();
        self.orchestrator.reset_cache();
        info!("Logged out");
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.keystore.is_logged_in()
    }

    pub fn public_key(&self) -> Option<String> {
        self.keystore.public_key()
    }

    /// Hex private key of the active identity, for backup.
    pub fn export_secret_key(&self) -> SyncResult<String> {
        Ok(self.keystore.require()?.secret_hex())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Notes
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist a note (stamping `updated_at`) and queue it for sync.
    pub fn save_note(&self, mut note: Note) -> SyncResult<Note> {
        note.updated_at = Utc::now();
        self.storage.save_note(&note)?;
        self.storage.remove_tombstone(&note.id)?;
        self.queue.enqueue_save(&note.id)?;
        Ok(note)
    }

    /// Create and save a new note.
    pub fn create_note(&self, title: &str, content: &str) -> SyncResult<Note> {
        self.save_note(Note::new(title, content))
    }

    /// Delete locally, remember the deletion, and queue a tombstone for the
    /// last synced copy.
    pub fn delete_note(&self, note_id: &str) -> SyncResult<()> {
        let note = self
            .storage
            .load_note(note_id)?
            .ok_or_else(|| SyncError::NoteNotFound(note_id.to_string()))?;

        self.storage.delete_note(note_id)?;
        self.storage.save_tombstone(&Tombstone {
            note_id: note_id.to_string(),
            deleted_at: Utc::now(),
            remote_event_id: note.sync_event_id.clone(),
        })?;
        self.queue.enqueue_delete(note_id, note.sync_event_id)?;
        info!(%note_id, "Note deleted");
        Ok(())
    }

    pub fn get_note(&self, note_id: &str) -> SyncResult<Option<Note>> {
        self.storage.load_note(note_id)
    }

    /// All notes, most recently updated first
    pub fn list_notes(&self) -> SyncResult<Vec<Note>> {
        self.storage.list_notes()
    }

    /// Publish a note in the clear, honoring the privacy settings.
    ///
    /// The note is marked as shared and saved again so the flag syncs too.
    pub async fn publish_note_publicly(&self, note_id: &str) -> SyncResult<PublishReport> {
        let keypair = self.keystore.require()?;
        if !self.pool.is_online() {
            return Err(SyncError::Offline(
                "no reachable relay configured".to_string(),
            ));
        }
        let mut note = self
            .storage
            .load_note(note_id)?
            .ok_or_else(|| SyncError::NoteNotFound(note_id.to_string()))?;

        let privacy = self.config.read().privacy;
        let envelope = EventCodec::new(keypair).encode_public_note(&note, &privacy)?;
        let report = self.pool.publish(&envelope).await?;
        if !report.any_accepted() {
            return Err(SyncError::PublishFailure(report.failure_summary()));
        }

        note.is_shared_publicly = Some(true);
        self.save_note(note)?;
        info!(%note_id, event_id = %envelope.id, "Note published publicly");
        Ok(report)
    }

    /// Pending local mutations, oldest first
    pub fn pending_mutations(&self) -> SyncResult<Vec<QueueEntry>> {
        self.queue.pending()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ontology
    // ═══════════════════════════════════════════════════════════════════════

    pub fn ontology(&self) -> SyncResult<Ontology> {
        self.orchestrator.ontology()
    }

    /// Replace the ontology; it is published on the next cycle.
    pub fn update_ontology(&self, ontology: Ontology) -> SyncResult<Ontology> {
        self.orchestrator.update_ontology(ontology)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn run_sync_cycle(&self, force_full_resync: bool) -> SyncResult<SyncReport> {
        self.orchestrator.run_cycle(force_full_resync).await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    /// Subscribe to sync events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.orchestrator.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Live feeds
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn send_direct_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> SyncResult<DirectMessage> {
        self.feeds.send_direct_message(recipient, text).await
    }

    pub async fn subscribe_direct_messages<F>(&self, on_message: F) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(DirectMessage) + Send + Sync + 'static,
    {
        self.feeds.subscribe_direct_messages(on_message).await
    }

    pub async fn subscribe_to_topic<F>(&self, tag: &str, on_note: F) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(PublicNote) + Send + Sync + 'static,
    {
        self.feeds.subscribe_to_topic(tag, on_note).await
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.feeds.unsubscribe(handle)
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.pool.active_subscriptions()
    }

    pub fn direct_messages(&self, peer: Option<&str>) -> SyncResult<Vec<DirectMessage>> {
        self.feeds.direct_messages(peer)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Relays
    // ═══════════════════════════════════════════════════════════════════════

    pub fn relays(&self) -> Vec<String> {
        self.config.read().relays.clone()
    }

    /// Add a relay to the config and start using it.
    pub fn add_relay(&self, url: &str) -> SyncResult<()> {
        let mut config = self.config.write();
        config.add_relay(url)?;
        self.persist_relays(&config)
    }

    /// Remove a relay. Returns whether it was configured.
    pub fn remove_relay(&self, url: &str) -> SyncResult<bool> {
        let mut config = self.config.write();
        if !config.remove_relay(url) {
            return Ok(false);
        }
        self.persist_relays(&config)?;
        Ok(true)
    }

    fn persist_relays(&self, config: &SyncConfig) -> SyncResult<()> {
        config.save(self.data_dir.join(CONFIG_FILE_NAME))?;
        if self.relays_from_config {
            self.pool.set_clients(ws_clients(&config.relays));
        }
        info!(relays = config.relays.len(), "Relay list updated");
        Ok(())
    }
}
