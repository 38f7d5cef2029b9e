//! Pairing encryption: X25519 key agreement + AES-256-GCM.
//!
//! The wire format of a sealed frame is:
//! `sender_public_key(32) || nonce(12) || ciphertext || auth_tag(16)`
//!
//! The raw X25519 shared secret is used directly as the AES-256 key. There
//! is no KDF step; adding one would change the wire format.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Smallest frame that can hold a key, a nonce and a tag.
pub const MIN_FRAME_LEN: usize = PUBLIC_KEY_LEN + NONCE_LEN + TAG_LEN;

/// Errors raised by the pairing cipher
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key: expected {expected} bytes, got {got}")]
    InvalidPublicKey { expected: usize, got: usize },

    #[error("Key agreement produced a low-order shared secret")]
    NonContributory,

    #[error("Frame too short: {len} bytes, need at least {min}")]
    FrameTooShort { len: usize, min: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,
}

/// A single-use key pair. The secret half is consumed by [`open`](Self::open).
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Decrypt a frame produced by [`seal`] for this key pair.
    pub fn open(self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(frame, self.secret)
    }
}

pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let bytes: [u8; PUBLIC_KEY_LEN] =
        bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey {
                expected: PUBLIC_KEY_LEN,
                got: bytes.len(),
            })?;
    Ok(PublicKey::from(bytes))
}

/// Encrypt `plaintext` for `recipient` under a fresh sender key pair.
///
/// Returns `sender_public_key(32) || nonce(12) || ciphertext || auth_tag(16)`.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let sender = EphemeralKeyPair::generate();
    let shared = sender.secret.diffie_hellman(recipient);
    let cipher = cipher_for(&shared)?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Pairing encryption failed: {}", e)))?;

    let mut frame = Vec::with_capacity(PUBLIC_KEY_LEN + NONCE_LEN + ciphertext_with_tag.len());
    frame.extend_from_slice(sender.public.as_bytes());
    frame.extend_from_slice(nonce.as_slice());
    frame.extend_from_slice(&ciphertext_with_tag);

    Ok(frame)
}

/// Decrypt a sealed frame with the recipient's ephemeral secret.
///
/// Any tampering, or a frame sealed for a different key, fails with
/// `AuthenticationFailed`; no plaintext is returned in that case.
pub fn open(frame: &[u8], secret: EphemeralSecret) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(CryptoError::FrameTooShort {
            len: frame.len(),
            min: MIN_FRAME_LEN,
        });
    }

    let (sender_public, rest) = frame.split_at(PUBLIC_KEY_LEN);
    let (nonce, ciphertext_with_tag) = rest.split_at(NONCE_LEN);

    let shared = secret.diffie_hellman(&parse_public_key(sender_public)?);
    let cipher = cipher_for(&shared)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext_with_tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

fn cipher_for(shared: &SharedSecret) -> Result<Aes256Gcm, CryptoError> {
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }
    Ok(Aes256Gcm::new(shared.as_bytes().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let receiver = EphemeralKeyPair::generate();
        let plaintext = b"DATABASE_URL=postgres://localhost";

        let frame = seal(plaintext, &receiver.public_key()).unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN + plaintext.len());

        let opened = receiver.open(&frame).unwrap();
        assert_eq!(opened, plaintext.to_vec());
    }

    #[test]
    fn empty_payload_roundtrip() {
        let receiver = EphemeralKeyPair::generate();
        let frame = seal(b"", &receiver.public_key()).unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert!(receiver.open(&frame).unwrap().is_empty());
    }

    #[test]
    fn frames_are_unique() {
        let receiver = EphemeralKeyPair::generate();
        let a = seal(b"same", &receiver.public_key()).unwrap();
        let b = seal(b"same", &receiver.public_key()).unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..PUBLIC_KEY_LEN], b[..PUBLIC_KEY_LEN]);
    }

    #[test]
    fn wrong_key_fails() {
        let intended = EphemeralKeyPair::generate();
        let other = EphemeralKeyPair::generate();

        let frame = seal(b"secret", &intended.public_key()).unwrap();
        assert!(matches!(
            other.open(&frame),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let receiver = EphemeralKeyPair::generate();
        let mut frame = seal(b"secret data", &receiver.public_key()).unwrap();
        frame[MIN_FRAME_LEN - TAG_LEN] ^= 0xFF;
        assert!(matches!(
            receiver.open(&frame),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_nonce_fails() {
        let receiver = EphemeralKeyPair::generate();
        let mut frame = seal(b"secret data", &receiver.public_key()).unwrap();
        frame[PUBLIC_KEY_LEN] ^= 0x01;
        assert!(receiver.open(&frame).is_err());
    }

    #[test]
    fn tampered_auth_tag_fails() {
        let receiver = EphemeralKeyPair::generate();
        let mut frame = seal(b"secret data", &receiver.public_key()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(receiver.open(&frame).is_err());
    }

    #[test]
    fn short_frame_rejected() {
        let receiver = EphemeralKeyPair::generate();
        assert!(matches!(
            receiver.open(&[0u8; MIN_FRAME_LEN - 1]),
            Err(CryptoError::FrameTooShort { len: 59, min: 60 })
        ));
    }

    #[test]
    fn low_order_sender_key_rejected() {
        let receiver = EphemeralKeyPair::generate();
        // All-zero point yields an all-zero shared secret
        let frame = vec![0u8; MIN_FRAME_LEN + 4];
        assert!(matches!(
            receiver.open(&frame),
            Err(CryptoError::NonContributory)
        ));
    }

    #[test]
    fn public_key_length_checked() {
        assert!(parse_public_key(&[7u8; 32]).is_ok());
        assert!(matches!(
            parse_public_key(&[7u8; 31]),
            Err(CryptoError::InvalidPublicKey { expected: 32, got: 31 })
        ));
    }
}
