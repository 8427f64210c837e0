//! Sync cycle status, events and reports
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncStatus: orchestrator state                                 │
//! │  ├── Idle: no cycle running                                     │
//! │  ├── Syncing: a cycle is in flight                              │
//! │  └── Error: the last cycle aborted                              │
//! │                                                                 │
//! │  SyncEvent: broadcast notifications                             │
//! │  ├── CycleStarted / CycleCompleted / CycleFailed                │
//! │  ├── NoteUpdated: a remote copy replaced the local note         │
//! │  ├── NoteRemoved: a remote tombstone removed a local note       │
//! │  └── OntologyReplaced: the remote tree replaced the local one   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

/// Status of the sync orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "Idle"),
            SyncStatus::Syncing => write!(f, "Syncing"),
            SyncStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// What happened to the ontology in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OntologyOutcome {
    /// Local and remote agree (or there is nothing to do)
    #[default]
    Unchanged,
    /// The local tree was published
    Published,
    /// The remote tree replaced the local one
    Replaced,
    /// Publishing the local tree failed at every endpoint
    PublishFailed,
}

/// An envelope or queue entry that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Envelope id or entity id
    pub item: String,
    pub error: String,
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub full_resync: bool,
    pub ontology: OntologyOutcome,
    /// Notes overwritten by a newer remote copy
    pub notes_updated: Vec<String>,
    /// Notes removed because a remote tombstone cited them
    pub notes_removed: Vec<String>,
    /// Remote copies ignored because the note was deleted here
    pub notes_suppressed: Vec<String>,
    /// Notes whose queued save was published
    pub notes_published: Vec<String>,
    /// Notes whose queued delete was tombstoned
    pub notes_tombstoned: Vec<String>,
    /// Queue entries left for the next cycle
    pub still_queued: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn new(started_at: DateTime<Utc>, full_resync: bool) -> Self {
        Self {
            started_at,
            full_resync,
            ontology: OntologyOutcome::Unchanged,
            notes_updated: Vec::new(),
            notes_removed: Vec::new(),
            notes_suppressed: Vec::new(),
            notes_published: Vec::new(),
            notes_tombstoned: Vec::new(),
            still_queued: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, item: impl Into<String>, error: impl fmt::Display) {
        self.failures.push(ItemFailure {
            item: item.into(),
            error: error.to_string(),
        });
    }

    /// True if nothing was changed locally or remotely.
    pub fn is_noop(&self) -> bool {
        self.ontology == OntologyOutcome::Unchanged
            && self.notes_updated.is_empty()
            && self.notes_removed.is_empty()
            && self.notes_published.is_empty()
            && self.notes_tombstoned.is_empty()
    }
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    CycleStarted { full_resync: bool },
    NoteUpdated { note_id: String },
    NoteRemoved { note_id: String },
    OntologyReplaced,
    CycleCompleted { report: Box<SyncReport> },
    CycleFailed { message: String },
}

impl SyncEvent {
    /// Note id associated with this event, if any
    pub fn note_id(&self) -> Option<&str> {
        match self {
            SyncEvent::NoteUpdated { note_id } | SyncEvent::NoteRemoved { note_id } => {
                Some(note_id)
            }
            _ => None,
        }
    }
}
