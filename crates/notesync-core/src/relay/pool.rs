//! Multi-endpoint fan-out and the subscription arena
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  RelayPool                                                   │
//! │  ├── clients: Vec<Arc<dyn RelayClient>>                      │
//! │  ├── subscriptions: HashMap<SubId, Vec<JoinHandle>>          │
//! │  │     one reader task per endpoint, deduplicating by id     │
//! │  └── publish / query: join_all over clients, per-call timeout│
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::client::RelayClient;
use super::message::RelayMessage;
use super::ws::WsRelayClient;
use crate::error::{SyncError, SyncResult};
use crate::event::{Envelope, Filter};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

type Arena = Arc<Mutex<HashMap<String, Vec<JoinHandle<()>>>>>;

/// Result of publishing at one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOutcome {
    pub url: String,
    /// `Err` carries the rejection message or transport error
    pub result: Result<(), String>,
}

/// Per-endpoint outcomes of one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub event_id: String,
    pub outcomes: Vec<EndpointOutcome>,
}

impl PublishReport {
    pub fn accepted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// True if at least one endpoint stored the envelope.
    pub fn any_accepted(&self) -> bool {
        self.accepted_count() > 0
    }

    /// Summary of the failed endpoints, for error messages
    pub fn failure_summary(&self) -> String {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| format!("{}: {}", o.url, e)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Handle to a live subscription; cancelling tears down every endpoint's reader.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    arena: Arena,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the subscription. Returns false if it was already gone.
    pub fn cancel(&self) -> bool {
        cancel_in(&self.arena, &self.id)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}

fn cancel_in(arena: &Arena, id: &str) -> bool {
    match arena.lock().remove(id) {
        Some(tasks) => {
            for task in tasks {
                task.abort();
            }
            debug!(sub_id = %id, "Subscription cancelled");
            true
        }
        None => false,
    }
}

/// Fan-out client over a set of relay endpoints
pub struct RelayPool {
    clients: RwLock<Vec<Arc<dyn RelayClient>>>,
    subscriptions: Arena,
    publish_timeout: Duration,
    query_timeout: Duration,
}

impl RelayPool {
    pub fn new(clients: Vec<Arc<dyn RelayClient>>) -> Self {
        Self {
            clients: RwLock::new(clients),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            publish_timeout: DEFAULT_TIMEOUT,
            query_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, publish: Duration, query: Duration) -> Self {
        self.publish_timeout = publish;
        self.query_timeout = query;
        self
    }

    /// Replace the endpoint set. Live subscriptions keep their old endpoints.
    pub fn set_clients(&self, clients: Vec<Arc<dyn RelayClient>>) {
        *self.clients.write() = clients;
    }

    pub fn urls(&self) -> Vec<String> {
        self.clients.read().iter().map(|c| c.url().to_string()).collect()
    }

    /// At least one endpoint configured and reachable.
    pub fn is_online(&self) -> bool {
        self.clients.read().iter().any(|c| c.is_online())
    }

    fn snapshot(&self) -> SyncResult<Vec<Arc<dyn RelayClient>>> {
        let clients = self.clients.read().clone();
        if clients.is_empty() {
            return Err(SyncError::Offline("No relays configured".to_string()));
        }
        Ok(clients)
    }

    /// Publish to every endpoint in parallel. No retries.
    ///
    /// Fails with [`SyncError::Offline`] when no endpoint could be reached;
    /// rejections and partial failures are reported per endpoint instead.
    pub async fn publish(&self, envelope: &Envelope) -> SyncResult<PublishReport> {
        let clients = self.snapshot()?;
        let publish_timeout = self.publish_timeout;

        let results = join_all(clients.iter().map(|client| async move {
            let mut unreachable = false;
            let result = match timeout(publish_timeout, client.publish(envelope)).await {
                Ok(Ok(ack)) if ack.accepted => Ok(()),
                Ok(Ok(ack)) => Err(format!("rejected: {}", ack.message)),
                Ok(Err(e)) => {
                    unreachable = matches!(e, SyncError::Offline(_));
                    Err(e.to_string())
                }
                Err(_) => Err("timed out".to_string()),
            };
            if let Err(reason) = &result {
                warn!(url = %client.url(), id = %envelope.id, %reason, "Publish failed at endpoint");
            }
            let outcome = EndpointOutcome {
                url: client.url().to_string(),
                result,
            };
            (outcome, unreachable)
        }))
        .await;

        if results.iter().all(|(_, unreachable)| *unreachable) {
            return Err(SyncError::Offline(format!(
                "All {} relays unreachable",
                results.len()
            )));
        }
        let outcomes = results.into_iter().map(|(outcome, _)| outcome).collect();

        let report = PublishReport {
            event_id: envelope.id.clone(),
            outcomes,
        };
        debug!(
            id = %envelope.id,
            kind = envelope.kind,
            accepted = report.accepted_count(),
            total = report.outcomes.len(),
            "Published"
        );
        Ok(report)
    }

    /// One-shot query across all endpoints, deduplicated by envelope id.
    ///
    /// Fails only when every endpoint fails: [`SyncError::Offline`] if none
    /// could be reached, otherwise [`SyncError::Network`].
    pub async fn query(&self, filters: &[Filter]) -> SyncResult<Vec<Envelope>> {
        let clients = self.snapshot()?;
        let query_timeout = self.query_timeout;

        let results = join_all(clients.iter().map(|client| async move {
            let result = match timeout(query_timeout, client.query(filters)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Network(format!("{} timed out", client.url()))),
            };
            if let Err(e) = &result {
                warn!(url = %client.url(), error = %e, "Query failed at endpoint");
            }
            result
        }))
        .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures == clients.len() {
            if results
                .iter()
                .all(|r| matches!(r, Err(SyncError::Offline(_))))
            {
                return Err(SyncError::Offline(format!(
                    "All {} relays unreachable",
                    failures
                )));
            }
            return Err(SyncError::Network(format!(
                "All {} relays failed the query",
                failures
            )));
        }

        let mut seen = HashSet::new();
        let envelopes: Vec<Envelope> = results
            .into_iter()
            .flatten()
            .flatten()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        debug!(count = envelopes.len(), failures, "Query merged");
        Ok(envelopes)
    }

    /// Open a subscription on every endpoint.
    ///
    /// `on_envelope` sees each envelope id once no matter how many endpoints
    /// deliver it. `on_end_of_stream` fires once, after every endpoint has
    /// sent its stored matches. An existing subscription with the same id is
    /// replaced.
    pub async fn subscribe<F, G>(
        &self,
        filters: Vec<Filter>,
        id: Option<String>,
        on_envelope: F,
        on_end_of_stream: G,
    ) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let clients = self.snapshot()?;
        let sub_id = id.unwrap_or_else(|| format!("sub-{}", Ulid::new()));
        self.unsubscribe(&sub_id);

        let mut receivers = Vec::new();
        let mut unreachable = 0;
        for client in &clients {
            match client.subscribe(&sub_id, &filters).await {
                Ok(rx) => receivers.push((client.url().to_string(), rx)),
                Err(e) => {
                    if matches!(e, SyncError::Offline(_)) {
                        unreachable += 1;
                    }
                    warn!(url = %client.url(), error = %e, "Subscribe failed at endpoint")
                }
            }
        }
        if unreachable == clients.len() {
            return Err(SyncError::Offline(format!(
                "All {} relays unreachable",
                unreachable
            )));
        }
        if receivers.is_empty() {
            return Err(SyncError::Network(format!(
                "No relay accepted subscription {}",
                sub_id
            )));
        }

        let on_envelope = Arc::new(on_envelope);
        let on_end_of_stream = Arc::new(on_end_of_stream);
        let seen = Arc::new(Mutex::new(HashSet::<String>::new()));
        let pending_eose = Arc::new(AtomicUsize::new(receivers.len()));

        let tasks = receivers
            .into_iter()
            .map(|(url, mut rx)| {
                let on_envelope = on_envelope.clone();
                let on_end_of_stream = on_end_of_stream.clone();
                let seen = seen.clone();
                let pending_eose = pending_eose.clone();
                let sub_id = sub_id.clone();

                tokio::spawn(async move {
                    let mut stored_done = false;
                    let finish_stored = |done: &mut bool| {
                        if !*done {
                            *done = true;
                            if pending_eose.fetch_sub(1, Ordering::SeqCst) == 1 {
                                on_end_of_stream();
                            }
                        }
                    };

                    while let Some(message) = rx.recv().await {
                        match message {
                            RelayMessage::Event { envelope, .. } => {
                                if seen.lock().insert(envelope.id.clone()) {
                                    on_envelope(envelope);
                                }
                            }
                            RelayMessage::Eose(_) => finish_stored(&mut stored_done),
                            RelayMessage::Closed { message, .. } => {
                                warn!(%url, %sub_id, %message, "Relay closed subscription");
                                break;
                            }
                            RelayMessage::Notice(notice) => debug!(%url, %notice, "Relay notice"),
                            RelayMessage::Ok { .. } => {}
                        }
                    }
                    finish_stored(&mut stored_done);
                    debug!(%url, %sub_id, "Subscription stream ended");
                })
            })
            .collect();

        self.subscriptions.lock().insert(sub_id.clone(), tasks);
        info!(%sub_id, "Subscription opened");

        Ok(SubscriptionHandle {
            id: sub_id,
            arena: self.subscriptions.clone(),
        })
    }

    /// Cancel a subscription by id.
    pub fn unsubscribe(&self, id: &str) -> bool {
        cancel_in(&self.subscriptions, id)
    }

    /// Ids of subscriptions with at least one endpoint still streaming
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, tasks)| tasks.iter().any(|t| !t.is_finished()))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn cancel_all(&self) {
        let drained: Vec<(String, Vec<JoinHandle<()>>)> =
            self.subscriptions.lock().drain().collect();
        for (id, tasks) in drained {
            for task in tasks {
                task.abort();
            }
            debug!(sub_id = %id, "Subscription cancelled");
        }
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// One WebSocket client per URL
pub fn ws_clients(urls: &[String]) -> Vec<Arc<dyn RelayClient>> {
    urls.iter()
        .map(|url| Arc::new(WsRelayClient::new(url.clone())) as Arc<dyn RelayClient>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{tag, EventKind};
    use crate::identity::Keypair;
    use crate::relay::MemoryRelay;

    fn pool_of(relays: &[MemoryRelay]) -> RelayPool {
        RelayPool::new(
            relays
                .iter()
                .map(|r| Arc::new(r.clone()) as Arc<dyn RelayClient>)
                .collect(),
        )
    }

    fn note_envelope(keypair: &Keypair, t: u64) -> Envelope {
        Envelope::sign(
            keypair,
            EventKind::PublicNote,
            t,
            vec![tag(["t", "rust"])],
            "body".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_reports_per_endpoint() {
        let a = MemoryRelay::new("mem://a");
        let b = MemoryRelay::new("mem://b");
        b.set_reject_publishes(true);
        let pool = pool_of(&[a.clone(), b.clone()]);

        let report = pool
            .publish(&note_envelope(&Keypair::generate().unwrap(), 1))
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.accepted_count(), 1);
        assert!(report.any_accepted());
        assert!(report.failure_summary().contains("mem://b"));
    }

    #[tokio::test]
    async fn test_empty_pool_is_offline() {
        let pool = RelayPool::new(Vec::new());
        assert!(!pool.is_online());
        assert!(matches!(
            pool.query(&[Filter::new()]).await,
            Err(SyncError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn test_query_dedups_and_tolerates_partial_failure() {
        let a = MemoryRelay::new("mem://a");
        let b = MemoryRelay::new("mem://b");
        let c = MemoryRelay::new("mem://c");
        let pool = pool_of(&[a.clone(), b.clone(), c.clone()]);
        let keypair = Keypair::generate().unwrap();
        pool.publish(&note_envelope(&keypair, 1)).await.unwrap();
        c.set_online(false);

        let found = pool.query(&[Filter::new()]).await.unwrap();
        assert_eq!(found.len(), 1);

        a.set_online(false);
        b.set_online(false);
        assert!(matches!(
            pool.query(&[Filter::new()]).await,
            Err(SyncError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_are_offline_only_when_all_fail_that_way() {
        let a = MemoryRelay::new("mem://a");
        let b = MemoryRelay::new("mem://b");
        let pool = pool_of(&[a.clone(), b.clone()])
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));
        let envelope = note_envelope(&Keypair::generate().unwrap(), 1);

        a.set_online(false);
        let report = pool.publish(&envelope).await.unwrap();
        assert_eq!(report.accepted_count(), 1);

        b.set_online(false);
        assert!(matches!(
            pool.publish(&envelope).await,
            Err(SyncError::Offline(_))
        ));

        // a slow endpoint is a transport failure, not a missing network path
        b.set_online(true);
        b.set_latency(Some(Duration::from_millis(200)));
        assert!(matches!(
            pool.query(&[Filter::new()]).await,
            Err(SyncError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_websocket_relay_is_offline() {
        let pool = RelayPool::new(ws_clients(&["ws://127.0.0.1:1".to_string()]));
        assert!(pool.is_online());
        assert!(matches!(
            pool.query(&[Filter::new()]).await,
            Err(SyncError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_dedups_across_endpoints_and_cancels() {
        let a = MemoryRelay::new("mem://a");
        let b = MemoryRelay::new("mem://b");
        let pool = pool_of(&[a.clone(), b.clone()]);

        let received = Arc::new(AtomicUsize::new(0));
        let eose = Arc::new(AtomicUsize::new(0));
        let (r, e) = (received.clone(), eose.clone());
        let handle = pool
            .subscribe(
                vec![Filter::new().t_tag("rust")],
                Some("topic-rust".to_string()),
                move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    e.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
            .unwrap();
        assert_eq!(handle.id(), "topic-rust");

        pool.publish(&note_envelope(&Keypair::generate().unwrap(), 5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(eose.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_subscriptions(), vec!["topic-rust".to_string()]);

        assert!(handle.cancel());
        assert!(!pool.unsubscribe("topic-rust"));
        assert!(pool.active_subscriptions().is_empty());
    }
}
