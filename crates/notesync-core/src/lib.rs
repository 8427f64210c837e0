//! notesync Core Library
//!
//! Personal notes replicated through public relays, end-to-end encrypted to
//! the author's own key.
//!
//! ## Overview
//!
//! Every note is stored locally in redb and, on each sync cycle, published
//! to a set of relays as a signed envelope whose content is encrypted to the
//! author. Other devices holding the same identity fetch those envelopes and
//! merge them last-write-wins on `updated_at`. Deletions travel as signed
//! tombstones. A per-identity ontology (taxonomy tree) rides along as a
//! single replaceable envelope.
//!
//! ## Core Principles
//!
//! - **Local-first**: every edit lands in the local store first and is
//!   pushed from a durable mutation queue
//! - **Relays are dumb**: they only store and forward signed envelopes;
//!   all merging happens here
//! - **One identity**: a single Ed25519 keypair signs everything and
//!   derives the encryption keys
//!
//! ## Quick Start
//!
//! ```ignore
//! use notesync_core::NoteSyncEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = NoteSyncEngine::new("~/.notesync").await?;
//!     engine.generate_or_import_identity(None)?;
//!
//!     engine.create_note("Garden", "Plant tomatoes after the last frost")?;
//!
//!     let report = engine.run_sync_cycle(false).await?;
//!     println!("published {} notes", report.notes_published);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod event;
pub mod feeds;
pub mod identity;
pub mod relay;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::{PrivacySettings, SyncConfig};
pub use engine::NoteSyncEngine;
pub use error::{SyncError, SyncResult};
pub use event::{DecodedEvent, Envelope, EventCodec, EventKind, Filter};
pub use identity::{KeyStore, Keypair};
pub use relay::{MemoryRelay, PublishReport, RelayClient, RelayPool, SubscriptionHandle};
pub use storage::Storage;
pub use sync::{
    ItemFailure, MutationQueue, OntologyOutcome, SyncEvent, SyncOrchestrator, SyncReport,
    SyncStatus,
};
pub use types::*;
