//! Symmetric authenticated encryption of private key bytes
//!
//! Each user gets a distinct AES-256-GCM subkey derived from the process-wide
//! master secret via HKDF-SHA256, with the user id bound twice: as HKDF info
//! and as AAD. A fresh random iv is drawn per encryption, so encrypting the
//! same key twice never yields the same ciphertext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// AEAD algorithm identifier stored in every envelope
pub const ENCRYPTION_ALGORITHM: &str = "aes-256-gcm";

/// HKDF salt, fixed for the lifetime of the stored envelopes
const HKDF_SALT: &[u8] = b"defi-custody-engine/key-wrap/v1";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypted private key envelope, stored inside the WalletRecord.
///
/// All binary fields are base64 so the structure round-trips losslessly
/// through JSON storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub algorithm: String,
    pub iv: String,
    pub tag: String,
    pub ciphertext: String,
}

/// Encrypts and decrypts private key bytes, keyed per user
pub struct KeyEncryptionService {
    master_key: [u8; 32],
}

impl Drop for KeyEncryptionService {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

impl KeyEncryptionService {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    /// Derive the per-user subkey from the master secret
    fn user_key(&self, user_id: &str) -> Zeroizing<[u8; 32]> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &self.master_key);
        let mut key = Zeroizing::new([0u8; 32]);
        // 32 bytes is always a valid HKDF-SHA256 output length
        hk.expand(user_id.as_bytes(), key.as_mut())
            .expect("hkdf output length");
        key
    }

    /// Encrypt raw private key bytes for a user.
    ///
    /// Generates a fresh random iv per call - never reused.
    pub fn encrypt_private_key(&self, raw_key_bytes: &[u8], user_id: &str) -> Result<EncryptedKey> {
        let key = self.user_key(user_id);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| Error::Internal(format!("cipher init: {}", e)))?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let mut sealed = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: raw_key_bytes,
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|e| Error::Internal(format!("encryption failed: {}", e)))?;

        // AES-GCM appends the 16-byte tag to the ciphertext; store it separately
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedKey {
            algorithm: ENCRYPTION_ALGORITHM.to_string(),
            iv: BASE64.encode(iv),
            tag: BASE64.encode(&tag),
            ciphertext: BASE64.encode(&sealed),
        })
    }

    /// Decrypt an envelope back into raw private key bytes.
    ///
    /// The integrity tag is verified before any plaintext is released;
    /// tampering, a wrong user context, or corruption all fail with
    /// `Error::Decryption`. The returned buffer is zeroized on drop.
    pub fn decrypt_private_key(
        &self,
        encrypted: &EncryptedKey,
        user_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let (iv, tag, ciphertext) = decode_envelope(encrypted)?;

        let key = self.user_key(user_id);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| Error::Internal(format!("cipher init: {}", e)))?;

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|_| Error::Decryption("authentication tag mismatch".to_string()))?;

        Ok(Zeroizing::new(plaintext))
    }

    /// Lossless textual form of the envelope for storage
    pub fn serialize_encrypted_key(encrypted: &EncryptedKey) -> Result<String> {
        serde_json::to_string(encrypted).map_err(Error::from)
    }

    /// Parse an envelope back from its textual form.
    ///
    /// Any structurally invalid input fails with `Error::MalformedKey`.
    pub fn deserialize_encrypted_key(raw: &str) -> Result<EncryptedKey> {
        let encrypted: EncryptedKey = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedKey(format!("invalid envelope JSON: {}", e)))?;
        decode_envelope(&encrypted)?;
        Ok(encrypted)
    }
}

/// Decode and structurally validate an envelope
fn decode_envelope(encrypted: &EncryptedKey) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    if encrypted.algorithm != ENCRYPTION_ALGORITHM {
        return Err(Error::MalformedKey(format!(
            "unsupported algorithm: {}",
            encrypted.algorithm
        )));
    }

    let iv = BASE64
        .decode(&encrypted.iv)
        .map_err(|e| Error::MalformedKey(format!("invalid iv: {}", e)))?;
    if iv.len() != IV_LEN {
        return Err(Error::MalformedKey(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }

    let tag = BASE64
        .decode(&encrypted.tag)
        .map_err(|e| Error::MalformedKey(format!("invalid tag: {}", e)))?;
    if tag.len() != TAG_LEN {
        return Err(Error::MalformedKey(format!(
            "tag must be {} bytes, got {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let ciphertext = BASE64
        .decode(&encrypted.ciphertext)
        .map_err(|e| Error::MalformedKey(format!("invalid ciphertext: {}", e)))?;

    Ok((iv, tag, ciphertext))
}
