//! Encryption layer for envelope payloads
//!
//! Payloads addressed to a peer (or to ourselves) are encrypted with
//! ChaCha20-Poly1305 under a key agreed between the two identities:
//!
//! ```text
//! shared      = X25519(own_secret, peer_public)      (Ed25519 keys converted)
//! payload_key = HKDF-SHA256(shared, "notesync-payload-v1")
//! content     = base64(ciphertext + tag) "?iv=" base64(nonce)
//! ```
//!
//! Agreement is symmetric, so the sender and the recipient derive the same
//! key, and encrypting "to self" uses our own public key as the peer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::{SyncError, SyncResult};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Domain separation string for HKDF
const HKDF_INFO: &[u8] = b"notesync-payload-v1";

/// Separator between ciphertext and nonce in the encoded payload
const IV_SEPARATOR: &str = "?iv=";

/// Symmetric cipher for envelope payloads.
///
/// # Example
///
/// ```
/// use notesync_core::crypto::PayloadCipher;
///
/// let key = PayloadCipher::generate_key();
/// let cipher = PayloadCipher::new(&key);
///
/// let nonce = PayloadCipher::generate_nonce();
/// let ciphertext = cipher.encrypt_with_nonce(b"Hello", &nonce).unwrap();
/// let plaintext = cipher.decrypt_with_nonce(&ciphertext, &nonce).unwrap();
///
/// assert_eq!(plaintext, b"Hello");
/// ```
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl PayloadCipher {
    /// Create a new cipher with the given 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Generate a random 12-byte nonce.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with an explicit nonce. The nonce is not prepended.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> SyncResult<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| SyncError::EncryptDecrypt(format!("Encryption failed: {}", e)))
    }

    /// Decrypt with an explicit nonce.
    ///
    /// Fails on wrong key, wrong nonce or tampered ciphertext.
    pub fn decrypt_with_nonce(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> SyncResult<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| SyncError::EncryptDecrypt(format!("Decryption failed: {}", e)))
    }
}

/// Derive the payload key shared between `secret` and `peer`.
///
/// Both Ed25519 keys are mapped onto Curve25519 (the secret through its
/// expanded scalar, the public key through the birational map) and combined
/// with X25519.
pub fn conversation_key(secret: &SigningKey, peer: &VerifyingKey) -> SyncResult<[u8; 32]> {
    let own = X25519StaticSecret::from(secret.to_scalar_bytes());
    let peer = X25519PublicKey::from(peer.to_montgomery().to_bytes());
    let shared = own.diffie_hellman(&peer);

    if !shared.was_contributory() {
        return Err(SyncError::EncryptDecrypt(
            "Key agreement produced a non-contributory secret".to_string(),
        ));
    }

    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut output = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut output)
        .map_err(|e| SyncError::EncryptDecrypt(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}

/// Encrypt a UTF-8 payload into the `ciphertext?iv=nonce` wire form.
pub fn encrypt_payload(key: &[u8; 32], plaintext: &str) -> SyncResult<String> {
    let nonce = PayloadCipher::generate_nonce();
    let ciphertext = PayloadCipher::new(key).encrypt_with_nonce(plaintext.as_bytes(), &nonce)?;
    Ok(format!(
        "{}{}{}",
        BASE64.encode(ciphertext),
        IV_SEPARATOR,
        BASE64.encode(nonce)
    ))
}

/// Decrypt a payload produced by [`encrypt_payload`].
pub fn decrypt_payload(key: &[u8; 32], payload: &str) -> SyncResult<String> {
    let (ciphertext_b64, nonce_b64) = payload
        .split_once(IV_SEPARATOR)
        .ok_or_else(|| SyncError::EncryptDecrypt("Payload is missing its iv".to_string()))?;

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| SyncError::EncryptDecrypt(format!("Invalid ciphertext encoding: {}", e)))?;
    let nonce_bytes = BASE64
        .decode(nonce_b64)
        .map_err(|e| SyncError::EncryptDecrypt(format!("Invalid iv encoding: {}", e)))?;
    let nonce: [u8; NONCE_SIZE] = nonce_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SyncError::EncryptDecrypt("iv must be 12 bytes".to_string()))?;

    let plaintext = PayloadCipher::new(key).decrypt_with_nonce(&ciphertext, &nonce)?;
    String::from_utf8(plaintext)
        .map_err(|e| SyncError::EncryptDecrypt(format!("Plaintext is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_key(byte: u8) -> SigningKey {
        SigningKey::from_bytes(&[byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_with_nonce_roundtrip() {
        let key = PayloadCipher::generate_key();
        let cipher = PayloadCipher::new(&key);
        let nonce = PayloadCipher::generate_nonce();

        let ciphertext = cipher.encrypt_with_nonce(b"Test", &nonce).unwrap();
        // plaintext + 16 byte tag, no nonce prepended
        assert_eq!(ciphertext.len(), 4 + 16);
        assert_eq!(cipher.decrypt_with_nonce(&ciphertext, &nonce).unwrap(), b"Test");
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = PayloadCipher::generate_key();
        let cipher = PayloadCipher::new(&key);
        let ciphertext = cipher
            .encrypt_with_nonce(b"Test", &PayloadCipher::generate_nonce())
            .unwrap();
        let result = cipher.decrypt_with_nonce(&ciphertext, &PayloadCipher::generate_nonce());
        assert!(matches!(result, Err(SyncError::EncryptDecrypt(_))));
    }

    #[test]
    fn test_conversation_key_is_symmetric() {
        let alice = signing_key(1);
        let bob = signing_key(2);

        let ab = conversation_key(&alice, &bob.verifying_key()).unwrap();
        let ba = conversation_key(&bob, &alice.verifying_key()).unwrap();
        assert_eq!(ab, ba);

        let carol = signing_key(3);
        let ac = conversation_key(&alice, &carol.verifying_key()).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_self_conversation_key() {
        let alice = signing_key(7);
        let k1 = conversation_key(&alice, &alice.verifying_key()).unwrap();
        let k2 = conversation_key(&alice, &alice.verifying_key()).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_payload_roundtrip_unicode() {
        let key = PayloadCipher::generate_key();
        let text = "héllo 👋 <b>markup</b>";
        let payload = encrypt_payload(&key, text).unwrap();
        assert!(payload.contains("?iv="));
        assert_eq!(decrypt_payload(&key, &payload).unwrap(), text);
    }

    #[test]
    fn test_payload_same_plaintext_different_ciphertext() {
        let key = PayloadCipher::generate_key();
        let p1 = encrypt_payload(&key, "same").unwrap();
        let p2 = encrypt_payload(&key, "same").unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_payload_wrong_key_fails() {
        let payload = encrypt_payload(&PayloadCipher::generate_key(), "secret").unwrap();
        let result = decrypt_payload(&PayloadCipher::generate_key(), &payload);
        assert!(matches!(result, Err(SyncError::EncryptDecrypt(_))));
    }

    #[test]
    fn test_malformed_payloads_fail() {
        let key = PayloadCipher::generate_key();
        for bad in ["", "no-iv-here", "!!!?iv=AAAA", "AAAA?iv=AAAA"] {
            assert!(
                matches!(decrypt_payload(&key, bad), Err(SyncError::EncryptDecrypt(_))),
                "expected failure for {:?}",
                bad
            );
        }
    }
}
