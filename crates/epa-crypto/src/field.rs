//! AES-256-GCM encryption of individual wire fields.
//!
//! Each encrypted field carries its own random 96-bit nonce, the GCM
//! ciphertext (authentication tag appended), and a SHA-256 digest of the
//! plaintext. GCM authenticates the ciphertext in transit; the plaintext
//! digest lets the receiving system verify what was *meant* to be sent,
//! independent of any re-encryption hops between here and the pharmacy
//! switch. All three parts travel hex-encoded inside JSON message bodies.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

/// Hex length of a 256-bit key.
pub const FIELD_KEY_HEX_LEN: usize = 64;

const NONCE_LEN: usize = 12;

/// Failure inside the field-encryption collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldCryptoError {
    #[error("field encryption key is malformed: {reason}")]
    InvalidKey { reason: String },
    #[error("field encryption failed: {reason}")]
    Encrypt { reason: String },
    #[error("field decryption failed: {reason}")]
    Decrypt { reason: String },
    #[error("plaintext integrity digest mismatch")]
    IntegrityMismatch,
    #[error("malformed encoded field: {reason}")]
    Encoding { reason: String },
}

/// One encrypted wire field: ciphertext, nonce, and plaintext digest, all
/// hex-encoded for transport inside JSON bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub nonce: String,
    /// SHA-256 of the plaintext, verified after decryption.
    pub integrity_tag: String,
}

/// The encryption collaborator contract: `encrypt -> ciphertext + tag`,
/// `decrypt` verifying both the AEAD tag and the plaintext digest.
pub trait FieldEncryptor: Send + Sync {
    fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField, FieldCryptoError>;
    fn decrypt_field(&self, field: &EncryptedField) -> Result<String, FieldCryptoError>;
}

/// AES-256-GCM implementation holding the key in process memory only.
pub struct AesGcmFieldEncryptor {
    key: [u8; 32],
}

impl AesGcmFieldEncryptor {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 64-hex-character key, the form it takes in configuration.
    pub fn from_hex_key(hex: &str) -> Result<Self, FieldCryptoError> {
        if hex.len() != FIELD_KEY_HEX_LEN {
            return Err(FieldCryptoError::InvalidKey {
                reason: format!("expected {FIELD_KEY_HEX_LEN} hex chars, got {}", hex.len()),
            });
        }
        let bytes = hex_decode(hex).map_err(|reason| FieldCryptoError::InvalidKey { reason })?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, FieldCryptoError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| FieldCryptoError::InvalidKey {
            reason: "key is not 32 bytes".to_string(),
        })
    }
}

impl Drop for AesGcmFieldEncryptor {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for AesGcmFieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never reach logs.
        f.debug_struct("AesGcmFieldEncryptor").finish_non_exhaustive()
    }
}

impl FieldEncryptor for AesGcmFieldEncryptor {
    fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField, FieldCryptoError> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| FieldCryptoError::Encrypt {
                reason: "AEAD encryption rejected the input".to_string(),
            })?;
        Ok(EncryptedField {
            ciphertext: hex_encode(&ciphertext),
            nonce: hex_encode(&nonce_bytes),
            integrity_tag: hex_encode(&Sha256::digest(plaintext.as_bytes())),
        })
    }

    fn decrypt_field(&self, field: &EncryptedField) -> Result<String, FieldCryptoError> {
        let cipher = self.cipher()?;
        let nonce_bytes =
            hex_decode(&field.nonce).map_err(|reason| FieldCryptoError::Encoding { reason })?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(FieldCryptoError::Encoding {
                reason: format!("nonce is {} bytes, expected {NONCE_LEN}", nonce_bytes.len()),
            });
        }
        let ciphertext =
            hex_decode(&field.ciphertext).map_err(|reason| FieldCryptoError::Encoding { reason })?;
        let expected_tag = hex_decode(&field.integrity_tag)
            .map_err(|reason| FieldCryptoError::Encoding { reason })?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| FieldCryptoError::Decrypt {
                reason: "AEAD tag verification failed".to_string(),
            })?;

        let digest = Sha256::digest(&plaintext);
        if !bool::from(digest.as_slice().ct_eq(expected_tag.as_slice())) {
            return Err(FieldCryptoError::IntegrityMismatch);
        }

        String::from_utf8(plaintext).map_err(|_| FieldCryptoError::Decrypt {
            reason: "plaintext is not valid UTF-8".to_string(),
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    if !hex.is_ascii() {
        return Err("non-ASCII characters in hex string".to_string());
    }
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length hex string ({} chars)", hex.len()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| format!("non-hex characters at offset {i}"))
        })
        .collect()
}
