//! Direct-message and topic subscriptions
//!
//! These run beside the sync cycle and do not touch notes. Each incoming
//! envelope is decoded on its own; a malformed one is logged and dropped
//! without ending the subscription.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::event::{from_unix_seconds, DecodedEvent, EventCodec, EventKind, Filter};
use crate::identity::{parse_public_key, KeyStore};
use crate::relay::{RelayPool, SubscriptionHandle};
use crate::storage::Storage;
use crate::types::{DirectMessage, PublicNote};

/// Subscription id of the direct-message inbox
pub const DM_SUBSCRIPTION_ID: &str = "dm-inbox";

pub struct LiveFeeds {
    storage: Storage,
    keystore: Arc<KeyStore>,
    pool: Arc<RelayPool>,
    seen: Arc<Mutex<HashSet<String>>>,
}

impl LiveFeeds {
    pub fn new(storage: Storage, keystore: Arc<KeyStore>, pool: Arc<RelayPool>) -> Self {
        Self {
            storage,
            keystore,
            pool,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn online_codec(&self) -> SyncResult<EventCodec> {
        let keypair = self.keystore.require()?;
        if !self.pool.is_online() {
            return Err(SyncError::Offline(
                "no reachable relay configured".to_string(),
            ));
        }
        Ok(EventCodec::new(keypair))
    }

    /// Encrypt and publish a direct message, then store it locally.
    pub async fn send_direct_message(
        &self,
        recipient: &str,
        text: &str,
    ) -> SyncResult<DirectMessage> {
        parse_public_key(recipient)?;
        let codec = self.online_codec()?;
        let envelope = codec.encode_direct_message(recipient, text)?;

        let report = self.pool.publish(&envelope).await?;
        if !report.any_accepted() {
            return Err(SyncError::PublishFailure(report.failure_summary()));
        }

        let message = DirectMessage {
            id: envelope.id.clone(),
            from: codec.public_key(),
            to: recipient.to_string(),
            content: text.to_string(),
            created_at: from_unix_seconds(envelope.created_at)?,
        };
        self.storage.save_direct_message(&message)?;
        self.seen.lock().insert(message.id.clone());
        info!(to = %recipient, id = %message.id, "Direct message sent");
        Ok(message)
    }

    /// Subscribe to direct messages addressed to this identity.
    ///
    /// Each message is handed to `on_message` once, after it has been stored.
    /// Messages already in the store are not delivered again.
    pub async fn subscribe_direct_messages<F>(&self, on_message: F) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(DirectMessage) + Send + Sync + 'static,
    {
        let codec = self.online_codec()?;
        let me = codec.public_key();
        {
            let mut seen = self.seen.lock();
            for stored in self.storage.list_direct_messages(None)? {
                seen.insert(stored.id);
            }
        }

        let storage = self.storage.clone();
        let seen = self.seen.clone();
        let filter = Filter::new().kind(EventKind::EncryptedDirect).p_tag(me);

        self.pool
            .subscribe(
                vec![filter],
                Some(DM_SUBSCRIPTION_ID.to_string()),
                move |envelope| match codec.decode(&envelope) {
                    Ok(DecodedEvent::DirectMessage(message)) => {
                        if !seen.lock().insert(message.id.clone()) {
                            return;
                        }
                        if let Err(e) = storage.save_direct_message(&message) {
                            warn!(id = %message.id, error = %e, "Failed to store direct message");
                        }
                        on_message(message);
                    }
                    Ok(DecodedEvent::SelfNote(_)) => {}
                    Ok(_) => debug!(id = %envelope.id, "Ignoring non-message envelope"),
                    Err(e) => warn!(id = %envelope.id, error = %e, "Dropping malformed direct message"),
                },
                || debug!("Direct message backlog delivered"),
            )
            .await
    }

    /// Subscribe to public notes carrying `#tag`.
    pub async fn subscribe_to_topic<F>(&self, tag: &str, on_note: F) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(PublicNote) + Send + Sync + 'static,
    {
        let tag = tag.trim_start_matches('#').to_lowercase();
        if tag.is_empty() {
            return Err(SyncError::Config("topic tag must not be empty".to_string()));
        }
        let codec = self.online_codec()?;
        let filter = Filter::new().kind(EventKind::PublicNote).t_tag(tag.clone());

        let handle = self
            .pool
            .subscribe(
                vec![filter],
                Some(format!("topic-{}", tag)),
                move |envelope| match codec.decode(&envelope) {
                    Ok(DecodedEvent::PublicNote(note)) => on_note(note),
                    Ok(_) => debug!(id = %envelope.id, "Ignoring non-note envelope"),
                    Err(e) => warn!(id = %envelope.id, error = %e, "Dropping malformed public note"),
                },
                || {},
            )
            .await?;
        info!(%tag, "Following topic");
        Ok(handle)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.cancel()
    }

    /// Stored direct messages, optionally only those exchanged with `peer`
    pub fn direct_messages(&self, peer: Option<&str>) -> SyncResult<Vec<DirectMessage>> {
        self.storage.list_direct_messages(peer)
    }

    /// Drop the in-memory dedup set (on logout).
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}
