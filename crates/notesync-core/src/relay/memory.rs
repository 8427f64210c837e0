//! In-process relay
//!
//! Store-and-forward with the same observable behavior as a real relay:
//! signatures are checked on publish, kinds 30000-39999 keep only the newest
//! envelope per (author, kind, `d` tag), and live subscribers get every
//! matching envelope published after they subscribed. Cloning shares the
//! underlying store, so a test can keep a handle while a pool owns another.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{PublishAck, RelayClient, SUBSCRIPTION_BUFFER};
use super::message::RelayMessage;
use crate::error::{SyncError, SyncResult};
use crate::event::{is_parameterized_replaceable, Envelope, Filter};

struct Subscriber {
    sub_id: String,
    filters: Vec<Filter>,
    tx: mpsc::Sender<RelayMessage>,
}

#[derive(Default)]
struct State {
    envelopes: Vec<Envelope>,
    subscribers: Vec<Subscriber>,
}

struct Inner {
    url: String,
    state: Mutex<State>,
    online: AtomicBool,
    reject_publishes: AtomicBool,
    published: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

/// In-memory relay
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<Inner>,
}

impl MemoryRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                state: Mutex::new(State::default()),
                online: AtomicBool::new(true),
                reject_publishes: AtomicBool::new(false),
                published: AtomicUsize::new(0),
                latency: Mutex::new(None),
            }),
        }
    }

    /// When offline every call fails as if the endpoint were unreachable.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Answer every publish with `OK false`.
    pub fn set_reject_publishes(&self, reject: bool) {
        self.inner.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Number of publishes that were accepted (duplicates included).
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Snapshot of everything stored
    pub fn stored(&self) -> Vec<Envelope> {
        self.inner.state.lock().envelopes.clone()
    }

    /// Store an envelope without signature checks or counting. For seeding
    /// fixtures, including deliberately malformed ones.
    pub fn inject(&self, envelope: Envelope) {
        let mut state = self.inner.state.lock();
        deliver(&mut state, &envelope);
        state.envelopes.push(envelope);
    }

    async fn before_call(&self) -> SyncResult<()> {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.online.load(Ordering::SeqCst) {
            return Err(SyncError::Offline(format!("{} unreachable", self.inner.url)));
        }
        Ok(())
    }
}

fn matches_any(filters: &[Filter], envelope: &Envelope) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(envelope))
}

/// Push to live subscribers, dropping those whose receiver is gone.
fn deliver(state: &mut State, envelope: &Envelope) {
    state.subscribers.retain(|sub| {
        if !matches_any(&sub.filters, envelope) {
            return !sub.tx.is_closed();
        }
        match sub.tx.try_send(RelayMessage::Event {
            sub_id: sub.sub_id.clone(),
            envelope: envelope.clone(),
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(sub_id = %sub.sub_id, "Subscriber lagging, envelope dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}

#[async_trait]
impl RelayClient for MemoryRelay {
    fn url(&self) -> &str {
        &self.inner.url
    }

    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    async fn publish(&self, envelope: &Envelope) -> SyncResult<PublishAck> {
        self.before_call().await?;

        if self.inner.reject_publishes.load(Ordering::SeqCst) {
            return Ok(PublishAck {
                accepted: false,
                message: "blocked: publishing disabled".to_string(),
            });
        }
        if let Err(e) = envelope.verify() {
            return Ok(PublishAck {
                accepted: false,
                message: format!("invalid: {}", e),
            });
        }

        let mut state = self.inner.state.lock();
        if state.envelopes.iter().any(|e| e.id == envelope.id) {
            self.inner.published.fetch_add(1, Ordering::SeqCst);
            return Ok(PublishAck {
                accepted: true,
                message: "duplicate: already have this event".to_string(),
            });
        }

        if is_parameterized_replaceable(envelope.kind) {
            let d = envelope.tag_value("d").unwrap_or_default().to_string();
            let same_slot = |e: &Envelope| {
                e.pubkey == envelope.pubkey
                    && e.kind == envelope.kind
                    && e.tag_value("d").unwrap_or_default() == d
            };
            if state
                .envelopes
                .iter()
                .any(|e| same_slot(e) && e.created_at > envelope.created_at)
            {
                return Ok(PublishAck {
                    accepted: false,
                    message: "duplicate: have a newer version".to_string(),
                });
            }
            state.envelopes.retain(|e| !same_slot(e));
        }

        deliver(&mut state, envelope);
        state.envelopes.push(envelope.clone());
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        debug!(url = %self.inner.url, id = %envelope.id, kind = envelope.kind, "Stored envelope");

        Ok(PublishAck {
            accepted: true,
            message: String::new(),
        })
    }

    async fn query(&self, filters: &[Filter]) -> SyncResult<Vec<Envelope>> {
        self.before_call().await?;

        let everything = Filter::new();
        let filters: &[Filter] = if filters.is_empty() {
            std::slice::from_ref(&everything)
        } else {
            filters
        };

        let state = self.inner.state.lock();
        let mut matched: Vec<Envelope> = Vec::new();
        for filter in filters {
            let mut hits: Vec<&Envelope> = state
                .envelopes
                .iter()
                .filter(|e| filter.matches(e))
                .collect();
            hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                hits.truncate(limit);
            }
            for hit in hits {
                if !matched.iter().any(|m| m.id == hit.id) {
                    matched.push(hit.clone());
                }
            }
        }
        Ok(matched)
    }

    async fn subscribe(
        &self,
        sub_id: &str,
        filters: &[Filter],
    ) -> SyncResult<mpsc::Receiver<RelayMessage>> {
        self.before_call().await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.inner.state.lock();

        for envelope in state.envelopes.iter().filter(|e| matches_any(filters, e)) {
            let _ = tx.try_send(RelayMessage::Event {
                sub_id: sub_id.to_string(),
                envelope: envelope.clone(),
            });
        }
        let _ = tx.try_send(RelayMessage::Eose(sub_id.to_string()));

        state.subscribers.push(Subscriber {
            sub_id: sub_id.to_string(),
            filters: filters.to_vec(),
            tx,
        });
        Ok(rx)
    }
}
