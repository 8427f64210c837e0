//! Single-endpoint relay client abstraction

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::RelayMessage;
use crate::error::SyncResult;
use crate::event::{Envelope, Filter};

/// Capacity of the per-subscription message channel
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// A relay's answer to a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: bool,
    pub message: String,
}

/// One relay endpoint.
///
/// Implementations do no retrying, deduplication or reconnection; the
/// [`super::RelayPool`] fans calls out and the caller decides what to do with
/// failures.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Endpoint URI
    fn url(&self) -> &str;

    /// Whether a network path to this endpoint is currently believed usable.
    fn is_online(&self) -> bool;

    /// Send one envelope and wait for the relay's `OK`.
    async fn publish(&self, envelope: &Envelope) -> SyncResult<PublishAck>;

    /// One-shot query: everything stored that matches, up to end-of-stored-events.
    async fn query(&self, filters: &[Filter]) -> SyncResult<Vec<Envelope>>;

    /// Open a long-lived subscription.
    ///
    /// Stored matches arrive first, then `EOSE`, then live envelopes. Dropping
    /// the receiver ends the subscription on the relay side.
    async fn subscribe(
        &self,
        sub_id: &str,
        filters: &[Filter],
    ) -> SyncResult<mpsc::Receiver<RelayMessage>>;
}
