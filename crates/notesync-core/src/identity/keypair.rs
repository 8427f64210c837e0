//! Ed25519 identity keypair
//!
//! The private key is the 32-byte Ed25519 seed; the public key is the
//! 32-byte verifying key. Both travel as lowercase hex.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::crypto::conversation_key;
use crate::error::{SyncError, SyncResult};

/// The user's network identity.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> SyncResult<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| SyncError::Identity(format!("Failed to get random bytes: {}", e)))?;
        Ok(Self::from_seed(&seed))
    }

    /// Build a keypair from a 32-byte private key
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a hex-encoded private key (import)
    pub fn from_secret_hex(secret_hex: &str) -> SyncResult<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| SyncError::Identity(format!("Private key is not hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SyncError::Identity("Private key must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Private key as hex
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Public key as hex
    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    /// Ed25519 verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign an arbitrary message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Payload key shared with `peer` (our own key for self-encryption)
    pub fn conversation_key(&self, peer: &VerifyingKey) -> SyncResult<[u8; 32]> {
        conversation_key(&self.signing, peer)
    }

    /// Payload key for encrypting to ourselves
    pub fn self_key(&self) -> SyncResult<[u8; 32]> {
        self.conversation_key(&self.verifying_key())
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing.to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.signing.to_bytes() == other.signing.to_bytes()
    }
}

impl Eq for Keypair {}

/// Parse a hex public key
pub fn parse_public_key(public_hex: &str) -> SyncResult<VerifyingKey> {
    let bytes = hex::decode(public_hex)
        .map_err(|e| SyncError::Identity(format!("Public key is not hex: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SyncError::Identity("Public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| SyncError::Identity(format!("Invalid public key: {}", e)))
}

/// Verify `signature_hex` over `message` by `public_hex`
pub fn verify_signature(public_hex: &str, message: &[u8], signature_hex: &str) -> SyncResult<()> {
    let key = parse_public_key(public_hex)?;
    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| SyncError::SignatureInvalid(format!("Signature is not hex: {}", e)))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| SyncError::SignatureInvalid(format!("Malformed signature: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|_| SyncError::SignatureInvalid(format!("Bad signature from {}", public_hex)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_keys() {
        let a = Keypair::generate().unwrap();
        let b = Keypair::generate().unwrap();
        assert_ne!(a.secret_hex(), b.secret_hex());
        assert_eq!(a.public_hex().len(), 64);
        assert_eq!(a.secret_hex().len(), 64);
    }

    #[test]
    fn test_public_key_is_derived_deterministically() {
        let a = Keypair::generate().unwrap();
        let imported = Keypair::from_secret_hex(&a.secret_hex()).unwrap();
        assert_eq!(a.public_hex(), imported.public_hex());
        assert_eq!(a, imported);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        assert!(Keypair::from_secret_hex("zz").is_err());
        assert!(Keypair::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::generate().unwrap();
        let sig = kp.sign(b"message");
        let sig_hex = hex::encode(sig.to_bytes());
        assert!(verify_signature(&kp.public_hex(), b"message", &sig_hex).is_ok());
        assert!(verify_signature(&kp.public_hex(), b"other", &sig_hex).is_err());

        let other = Keypair::generate().unwrap();
        assert!(verify_signature(&other.public_hex(), b"message", &sig_hex).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = Keypair::generate().unwrap();
        let dbg = format!("{:?}", kp);
        assert!(!dbg.contains(&kp.secret_hex()));
        assert!(dbg.contains(&kp.public_hex()));
    }
}
