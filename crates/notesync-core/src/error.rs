//! Error types for notesync

use thiserror::Error;

/// Main error type for notesync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// No identity is loaded; the operation needs a keypair
    #[error("Not logged in: no identity loaded")]
    NotLoggedIn,

    /// No usable network path (no relays configured or network down)
    #[error("Offline: {0}")]
    Offline(String),

    /// A sync cycle is already running for this identity
    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    /// Payload could not be encrypted or decrypted
    #[error("Encryption/decryption failed: {0}")]
    EncryptDecrypt(String),

    /// No relay endpoint acknowledged a published envelope
    #[error("Publish failed: {0}")]
    PublishFailure(String),

    /// An envelope or its content could not be parsed
    #[error("Parse failure: {0}")]
    Parse(String),

    /// Envelope id or signature did not verify
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Note was not found in storage
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// Identity-related error (keys, import, stored keypair mismatch)
    #[error("Identity error: {0}")]
    Identity(String),

    /// Relay connection or protocol error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization of local data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether this error only affects a single envelope or queue entry.
    ///
    /// Item-level failures are recorded in the cycle report; everything else
    /// aborts the cycle.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            SyncError::EncryptDecrypt(_)
                | SyncError::Parse(_)
                | SyncError::SignatureInvalid(_)
                | SyncError::PublishFailure(_)
        )
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
