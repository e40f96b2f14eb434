//! Scan images are stored sealed with AES-256-GCM.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext+tag`. The scan id is bound
//! as associated data, so a blob copied under another scan's key fails to open.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use uuid::Uuid;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

fn decode_key(key_base64: &str) -> Result<[u8; KEY_LEN], EncryptionError> {
    base64::engine::general_purpose::STANDARD
        .decode(key_base64.trim())
        .ok()
        .and_then(|bytes| <[u8; KEY_LEN]>::try_from(bytes).ok())
        .ok_or(EncryptionError::InvalidKey)
}

impl EncryptionService {
    /// Build from the base64 `ENCRYPTION_KEY` (32 raw bytes).
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key = decode_key(key_base64)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, scan_id: Uuid, image: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: image,
            aad: scan_id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|_| EncryptionError::Seal(scan_id))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, scan_id: Uuid, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if sealed.len() <= NONCE_LEN {
            return Err(EncryptionError::Truncated(sealed.len()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: scan_id.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| EncryptionError::Open(scan_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Failed to seal image for scan {0}")]
    Seal(Uuid),

    #[error("Sealed image for scan {0} failed authentication")]
    Open(Uuid),

    #[error("Sealed image too short ({0} bytes)")]
    Truncated(usize),
}
