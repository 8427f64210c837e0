//! Relay-based synchronization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncOrchestrator                                               │
//! │  ├── KeyStore (identity, required for every cycle)              │
//! │  ├── RelayPool (query / publish fan-out)                        │
//! │  ├── MutationQueue (pending local saves and deletes)            │
//! │  └── event_tx: broadcast::Sender<SyncEvent>                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are resolved last-write-wins on `updated_at`; equal timestamps
//! keep the local copy.

mod events;
mod orchestrator;
mod queue;

pub use events::{ItemFailure, OntologyOutcome, SyncEvent, SyncReport, SyncStatus};
pub use orchestrator::{sanitize_html, SyncOrchestrator};
pub use queue::MutationQueue;
