//! Signed network envelopes
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "id":         hex(sha256([0, pubkey, created_at, kind, tags, content])),
//!   "pubkey":     hex(ed25519 verifying key),
//!   "created_at": unix seconds,
//!   "kind":       integer,
//!   "tags":       [["d", "..."], ["p", "..."], ...],
//!   "content":    string,
//!   "sig":        hex(ed25519 signature over the 32 id bytes)
//! }
//! ```
//!
//! Envelopes are immutable once signed: any change to the signed fields
//! changes the id and invalidates the signature.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};
use crate::identity::{verify_signature, Keypair};

/// Envelope kinds understood by notesync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Note published in the clear
    PublicNote,
    /// Encrypted payload (direct message or self-sync note)
    EncryptedDirect,
    /// Deletion request citing earlier envelope ids
    Deletion,
    /// Parameterized-replaceable taxonomy record
    Ontology,
}

impl EventKind {
    /// Numeric kind on the wire
    pub const fn as_u16(self) -> u16 {
        match self {
            EventKind::PublicNote => 1,
            EventKind::EncryptedDirect => 4,
            EventKind::Deletion => 5,
            EventKind::Ontology => 30001,
        }
    }

    /// Resolve a numeric kind; `None` for kinds we don't handle
    pub fn from_u16(kind: u16) -> Option<Self> {
        match kind {
            1 => Some(EventKind::PublicNote),
            4 => Some(EventKind::EncryptedDirect),
            5 => Some(EventKind::Deletion),
            30001 => Some(EventKind::Ontology),
            _ => None,
        }
    }
}

/// Relays keep only the newest envelope per (author, kind, `d` tag) for these kinds.
pub fn is_parameterized_replaceable(kind: u16) -> bool {
    (30000..40000).contains(&kind)
}

/// A signed network message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Envelope {
    /// Build and sign an envelope.
    pub fn sign(
        keypair: &Keypair,
        kind: EventKind,
        created_at: u64,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> SyncResult<Self> {
        let pubkey = keypair.public_hex();
        let kind = kind.as_u16();
        let id = Self::compute_id(&pubkey, created_at, kind, &tags, &content)?;
        let id_bytes =
            hex::decode(&id).map_err(|e| SyncError::Serialization(format!("Bad id hex: {}", e)))?;
        let sig = hex::encode(keypair.sign(&id_bytes).to_bytes());

        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig,
        })
    }

    /// Canonical id: SHA-256 over `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(
        pubkey: &str,
        created_at: u64,
        kind: u16,
        tags: &[Vec<String>],
        content: &str,
    ) -> SyncResult<String> {
        let canonical = serde_json::to_string(&(0u8, pubkey, created_at, kind, tags, content))
            .map_err(|e| SyncError::Serialization(format!("Failed to encode envelope: {}", e)))?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Check that the id matches the content and the signature matches the author.
    pub fn verify(&self) -> SyncResult<()> {
        let expected =
            Self::compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if expected != self.id {
            return Err(SyncError::SignatureInvalid(format!(
                "Envelope id mismatch for {}",
                self.id
            )));
        }
        let id_bytes = hex::decode(&self.id)
            .map_err(|e| SyncError::SignatureInvalid(format!("Envelope id is not hex: {}", e)))?;
        verify_signature(&self.pubkey, &id_bytes, &self.sig)
    }

    /// Typed kind, if it is one we handle
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::from_u16(self.kind)
    }

    /// First value of the first tag named `name`
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// First value of every tag named `name`
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode envelope: {}", e)))
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::Parse(format!("Failed to decode envelope: {}", e)))
    }
}

/// Build a tag from its parts
pub fn tag<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
