//! WebSocket relay client
//!
//! Each call opens its own connection: publish and query close it once the
//! relay has answered, a subscription keeps it open on a background task
//! until the receiver is dropped or the relay goes away.
//!
//! A connection attempt that fails at the socket level reports
//! [`SyncError::Offline`]; anything after the handshake is a
//! [`SyncError::Network`] error.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use ulid::Ulid;

use super::client::{PublishAck, RelayClient, SUBSCRIPTION_BUFFER};
use super::message::{ClientMessage, RelayMessage};
use crate::error::{SyncError, SyncResult};
use crate::event::{Envelope, Filter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay client speaking JSON arrays over a WebSocket
pub struct WsRelayClient {
    url: String,
}

impl WsRelayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn connect(&self) -> SyncResult<WsStream> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| connect_error(&self.url, e))?;
        debug!(url = %self.url, "Connected to relay");
        Ok(stream)
    }
}

/// Socket-level failures (refused, unresolvable, no route) mean no network path.
fn connect_error(url: &str, error: WsError) -> SyncError {
    match error {
        WsError::Io(e) => SyncError::Offline(format!("{} unreachable: {}", url, e)),
        other => SyncError::Network(format!("{}: {}", url, other)),
    }
}

async fn send(ws: &mut WsStream, message: &ClientMessage) -> SyncResult<()> {
    ws.send(Message::Text(message.to_json()?))
        .await
        .map_err(|e| SyncError::Network(format!("Send failed: {}", e)))
}

/// Next parseable relay message; `None` once the socket is closed.
async fn next_message(ws: &mut WsStream, url: &str) -> SyncResult<Option<RelayMessage>> {
    loop {
        match ws.next().await {
            None | Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Err(e)) => return Err(SyncError::Network(format!("{}: {}", url, e))),
            Some(Ok(Message::Text(text))) => match RelayMessage::from_json(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!(url, error = %e, "Dropping unparseable relay message"),
            },
            Some(Ok(_)) => continue,
        }
    }
}

#[async_trait]
impl RelayClient for WsRelayClient {
    fn url(&self) -> &str {
        &self.url
    }

    /// Reachability is only known per call; a configured endpoint is always a candidate.
    fn is_online(&self) -> bool {
        true
    }

    async fn publish(&self, envelope: &Envelope) -> SyncResult<PublishAck> {
        let mut ws = self.connect().await?;
        send(&mut ws, &ClientMessage::Event(envelope.clone())).await?;

        let ack = loop {
            match next_message(&mut ws, &self.url).await? {
                Some(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                }) if event_id == envelope.id => break PublishAck { accepted, message },
                Some(RelayMessage::Notice(notice)) => debug!(url = %self.url, %notice, "Relay notice"),
                Some(_) => continue,
                None => {
                    return Err(SyncError::Network(format!(
                        "{} closed before acknowledging {}",
                        self.url, envelope.id
                    )))
                }
            }
        };

        let _ = ws.close(None).await;
        Ok(ack)
    }

    async fn query(&self, filters: &[Filter]) -> SyncResult<Vec<Envelope>> {
        let sub_id = format!("q-{}", Ulid::new());
        let mut ws = self.connect().await?;
        send(
            &mut ws,
            &ClientMessage::Req {
                sub_id: sub_id.clone(),
                filters: filters.to_vec(),
            },
        )
        .await?;

        let mut envelopes = Vec::new();
        loop {
            match next_message(&mut ws, &self.url).await? {
                Some(RelayMessage::Event {
                    sub_id: id,
                    envelope,
                }) if id == sub_id => envelopes.push(envelope),
                Some(RelayMessage::Eose(id)) if id == sub_id => break,
                Some(RelayMessage::Closed { sub_id: id, message }) if id == sub_id => {
                    return Err(SyncError::Network(format!(
                        "{} closed query: {}",
                        self.url, message
                    )))
                }
                Some(_) => continue,
                None => break,
            }
        }

        let _ = send(&mut ws, &ClientMessage::Close(sub_id)).await;
        let _ = ws.close(None).await;
        debug!(url = %self.url, count = envelopes.len(), "Query complete");
        Ok(envelopes)
    }

    async fn subscribe(
        &self,
        sub_id: &str,
        filters: &[Filter],
    ) -> SyncResult<mpsc::Receiver<RelayMessage>> {
        let mut ws = self.connect().await?;
        send(
            &mut ws,
            &ClientMessage::Req {
                sub_id: sub_id.to_string(),
                filters: filters.to_vec(),
            },
        )
        .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let url = self.url.clone();
        let sub_id = sub_id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        let _ = send(&mut ws, &ClientMessage::Close(sub_id.clone())).await;
                        let _ = ws.close(None).await;
                        debug!(%url, %sub_id, "Subscription closed locally");
                        break;
                    }
                    next = next_message(&mut ws, &url) => match next {
                        Ok(Some(message)) => {
                            let ended = matches!(&message, RelayMessage::Closed { sub_id: id, .. } if *id == sub_id);
                            if tx.send(message).await.is_err() || ended {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(%url, %sub_id, "Relay closed subscription socket");
                            break;
                        }
                        Err(e) => {
                            warn!(%url, %sub_id, error = %e, "Subscription socket failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_failure_is_offline() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            connect_error("ws://a.example", WsError::Io(refused)),
            SyncError::Offline(_)
        ));
        assert!(matches!(
            connect_error("ws://a.example", WsError::ConnectionClosed),
            SyncError::Network(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_offline() {
        let client = WsRelayClient::new("ws://127.0.0.1:1");
        assert!(client.is_online());
        let result = client.query(&[Filter::new()]).await;
        assert!(matches!(result, Err(SyncError::Offline(_))));
    }
}
