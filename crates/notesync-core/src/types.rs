//! Core domain types for notesync

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Lifecycle state of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

/// A single note.
///
/// `updated_at` is the sole authority for conflict resolution between the
/// local copy and copies fetched from relays. `sync_event_id` names the most
/// recent self-encrypted envelope carrying this note, so that a later
/// deletion can tombstone it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: NoteStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_shared_publicly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_event_id: Option<String>,
}

impl Note {
    /// Create a new draft note with a fresh ULID and both timestamps set to now
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new().to_string(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            values: BTreeMap::new(),
            fields: BTreeMap::new(),
            status: NoteStatus::Draft,
            created_at: now,
            updated_at: now,
            folder_id: None,
            pinned: None,
            archived: None,
            is_shared_publicly: None,
            sync_event_id: None,
        }
    }

    /// Builder-style tag setter
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style key/value setter
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// One node of the taxonomy tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OntologyNode {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// The per-identity taxonomy tree.
///
/// There is only ever one live copy of this on the network; it is
/// addressed by a fixed `d` tag and replaced wholesale on publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ontology {
    #[serde(default)]
    pub nodes: BTreeMap<String, OntologyNode>,
    #[serde(default)]
    pub root_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Ontology {
    /// An empty tree stamped with the current time
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            root_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Insert a node, linking it under its parent (or as a root).
    ///
    /// Returns the new node's id. Does not touch `updated_at`; callers
    /// persist through [`crate::NoteSyncEngine::update_ontology`] which
    /// stamps it.
    pub fn add_node(&mut self, label: impl Into<String>, parent_id: Option<&str>) -> String {
        let id = Ulid::new().to_string();
        let node = OntologyNode {
            id: id.clone(),
            label: label.into(),
            parent_id: parent_id.map(str::to_string),
            children: Vec::new(),
            attributes: BTreeMap::new(),
        };
        match parent_id.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent) => parent.children.push(id.clone()),
            None => self.root_ids.push(id.clone()),
        }
        self.nodes.insert(id.clone(), node);
        id
    }
}

impl Default for Ontology {
    fn default() -> Self {
        Self::new()
    }
}

/// A direct message, sent or received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    /// Envelope id
    pub id: String,
    /// Sender public key (hex)
    pub from: String,
    /// Recipient public key (hex)
    pub to: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A note someone published in the clear (kind 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicNote {
    /// Envelope id
    pub event_id: String,
    /// Author public key (hex)
    pub author: String,
    pub note_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub values: BTreeMap<String, String>,
    pub published_at: DateTime<Utc>,
}

/// Action recorded in the mutation queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Save,
    Delete,
}

/// A pending local mutation waiting to be pushed to relays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub entity_id: String,
    pub action: QueueAction,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_event_id: Option<String>,
}

/// Record of a local deletion, kept so stale remote copies are not revived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub note_id: String,
    pub deleted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_event_id: Option<String>,
}
