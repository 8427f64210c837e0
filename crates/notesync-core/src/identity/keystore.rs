//! Persisted identity with an in-memory copy
//!
//! The keystore is constructed explicitly and handed to whatever needs the
//! identity (orchestrator, live feeds). Store and memory are always updated
//! together.

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::keypair::Keypair;
use crate::error::{SyncError, SyncResult};
use crate::storage::Storage;

/// Owner of the single identity keypair.
pub struct KeyStore {
    storage: Storage,
    current: RwLock<Option<Keypair>>,
}

impl KeyStore {
    /// Create a keystore over `storage`. Nothing is loaded until [`KeyStore::load`].
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
        }
    }

    /// Produce a fresh keypair without persisting it.
    pub fn generate() -> SyncResult<Keypair> {
        Keypair::generate()
    }

    /// Parse a hex private key and derive its public half. Nothing is persisted.
    pub fn import(secret_hex: &str) -> SyncResult<Keypair> {
        Keypair::from_secret_hex(secret_hex.trim())
    }

    /// Persist the keypair and make it the active identity.
    pub fn store(&self, keypair: &Keypair) -> SyncResult<()> {
        self.storage
            .save_identity_keys(&keypair.secret_hex(), &keypair.public_hex())?;
        *self.current.write() = Some(keypair.clone());
        info!(public_key = %keypair.public_hex(), "Identity stored");
        Ok(())
    }

    /// Load the persisted identity into memory.
    ///
    /// Returns `false` (with memory cleared) when either key is missing.
    pub fn load(&self) -> SyncResult<bool> {
        let Some((secret_hex, public_hex)) = self.storage.load_identity_keys()? else {
            debug!("No stored identity");
            *self.current.write() = None;
            return Ok(false);
        };

        let keypair = Keypair::from_secret_hex(&secret_hex)?;
        if keypair.public_hex() != public_hex {
            warn!("Stored public key does not match stored private key");
            *self.current.write() = None;
            return Err(SyncError::Identity(
                "Stored public key does not match private key".to_string(),
            ));
        }

        *self.current.write() = Some(keypair);
        debug!(public_key = %public_hex, "Identity loaded");
        Ok(true)
    }

    /// Remove the persisted identity and forget it in memory.
    pub fn clear(&self) -> SyncResult<()> {
        self.storage.clear_identity_keys()?;
        *self.current.write() = None;
        info!("Identity cleared");
        Ok(())
    }

    /// Whether an identity is loaded.
    pub fn is_logged_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// The active keypair.
    pub fn keypair(&self) -> Option<Keypair> {
        self.current.read().clone()
    }

    /// The active keypair, or `NotLoggedIn`.
    pub fn require(&self) -> SyncResult<Keypair> {
        self.keypair().ok_or(SyncError::NotLoggedIn)
    }

    /// Public key of the active identity.
    pub fn public_key(&self) -> Option<String> {
        self.current.read().as_ref().map(Keypair::public_hex)
    }
}
