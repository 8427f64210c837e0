//! Relay wire messages (JSON arrays)
//!
//! ```text
//! client -> relay   ["EVENT", <envelope>]
//!                   ["REQ", <sub_id>, <filter>, ...]
//!                   ["CLOSE", <sub_id>]
//! relay -> client   ["EVENT", <sub_id>, <envelope>]
//!                   ["EOSE", <sub_id>]
//!                   ["OK", <event_id>, <accepted>, <message>]
//!                   ["NOTICE", <message>]
//!                   ["CLOSED", <sub_id>, <message>]
//! ```

use serde_json::{json, Value};

use crate::error::{SyncError, SyncResult};
use crate::event::{Envelope, Filter};

/// Messages we send to a relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Envelope),
    Req { sub_id: String, filters: Vec<Filter> },
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> SyncResult<String> {
        let value = match self {
            ClientMessage::Event(envelope) => json!(["EVENT", envelope]),
            ClientMessage::Req { sub_id, filters } => {
                let mut parts = vec![json!("REQ"), json!(sub_id)];
                for filter in filters {
                    parts.push(serde_json::to_value(filter).map_err(|e| {
                        SyncError::Serialization(format!("Failed to encode filter: {}", e))
                    })?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close(sub_id) => json!(["CLOSE", sub_id]),
        };
        Ok(value.to_string())
    }

    pub fn from_json(text: &str) -> SyncResult<Self> {
        let parts = parse_array(text)?;
        match label(&parts)? {
            "EVENT" => Ok(ClientMessage::Event(envelope_at(&parts, 1)?)),
            "REQ" => {
                let sub_id = string_at(&parts, 1)?;
                let filters = parts[2..]
                    .iter()
                    .map(|f| {
                        serde_json::from_value(f.clone())
                            .map_err(|e| SyncError::Parse(format!("Invalid filter: {}", e)))
                    })
                    .collect::<SyncResult<Vec<Filter>>>()?;
                Ok(ClientMessage::Req { sub_id, filters })
            }
            "CLOSE" => Ok(ClientMessage::Close(string_at(&parts, 1)?)),
            other => Err(SyncError::Parse(format!("Unknown client message: {}", other))),
        }
    }
}

/// Messages a relay sends to us
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: String, envelope: Envelope },
    Eose(String),
    Ok { event_id: String, accepted: bool, message: String },
    Notice(String),
    Closed { sub_id: String, message: String },
}

impl RelayMessage {
    pub fn to_json(&self) -> String {
        match self {
            RelayMessage::Event { sub_id, envelope } => json!(["EVENT", sub_id, envelope]),
            RelayMessage::Eose(sub_id) => json!(["EOSE", sub_id]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Notice(message) => json!(["NOTICE", message]),
            RelayMessage::Closed { sub_id, message } => json!(["CLOSED", sub_id, message]),
        }
        .to_string()
    }

    pub fn from_json(text: &str) -> SyncResult<Self> {
        let parts = parse_array(text)?;
        match label(&parts)? {
            "EVENT" => Ok(RelayMessage::Event {
                sub_id: string_at(&parts, 1)?,
                envelope: envelope_at(&parts, 2)?,
            }),
            "EOSE" => Ok(RelayMessage::Eose(string_at(&parts, 1)?)),
            "OK" => Ok(RelayMessage::Ok {
                event_id: string_at(&parts, 1)?,
                accepted: parts
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| SyncError::Parse("OK without status".to_string()))?,
                message: string_at(&parts, 3).unwrap_or_default(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice(string_at(&parts, 1)?)),
            "CLOSED" => Ok(RelayMessage::Closed {
                sub_id: string_at(&parts, 1)?,
                message: string_at(&parts, 2).unwrap_or_default(),
            }),
            other => Err(SyncError::Parse(format!("Unknown relay message: {}", other))),
        }
    }
}

fn parse_array(text: &str) -> SyncResult<Vec<Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Array(parts)) => Ok(parts),
        Ok(_) => Err(SyncError::Parse("Relay message is not an array".to_string())),
        Err(e) => Err(SyncError::Parse(format!("Invalid relay message: {}", e))),
    }
}

fn label(parts: &[Value]) -> SyncResult<&str> {
    parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Parse("Missing message label".to_string()))
}

fn string_at(parts: &[Value], index: usize) -> SyncResult<String> {
    parts
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::Parse(format!("Expected string at position {}", index)))
}

fn envelope_at(parts: &[Value], index: usize) -> SyncResult<Envelope> {
    let value = parts
        .get(index)
        .ok_or_else(|| SyncError::Parse("Missing envelope".to_string()))?;
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Parse(format!("Invalid envelope: {}", e)))
}
