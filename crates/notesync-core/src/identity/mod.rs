//! Identity module for notesync
//!
//! A single Ed25519 keypair is the user's network identity. It signs every
//! envelope, and its X25519 form is used for payload key agreement.
//!
//! ## Example
//!
//! ```rust
//! use notesync_core::identity::{verify_signature, Keypair};
//!
//! let keypair = Keypair::generate().unwrap();
//! let signature = keypair.sign(b"hello");
//!
//! assert!(verify_signature(
//!     &keypair.public_hex(),
//!     b"hello",
//!     &hex::encode(signature.to_bytes()),
//! )
//! .is_ok());
//! ```

mod keypair;
mod keystore;

pub use keypair::{parse_public_key, verify_signature, Keypair};
pub use keystore::KeyStore;
