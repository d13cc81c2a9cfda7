//! AES-256-GCM envelope encryption for cache values.
//!
//! Grounded on `aes-gcm`, the same crate the wider example pack reaches for
//! in its enterprise cache's encrypted tier.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENVELOPE_MARKER: &str = "pq-envelope";
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed (wrong key, tampered ciphertext, or mismatched AAD)")]
    DecryptFailed,
    #[error("envelope has unsupported version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopePayload {
    pub key_version: u32,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub marker: String,
    pub v: u32,
    pub payload: EnvelopePayload,
}

/// Canonical AAD binding: scope, schema version, and an optional store
/// identifier, so a value encrypted for one logical store can never
/// successfully decrypt under another.
#[derive(Debug, Clone, Serialize)]
struct Aad<'a> {
    scope: &'static str,
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "storeId", skip_serializing_if = "Option::is_none")]
    store_id: Option<&'a str>,
}

fn build_aad(store_id: Option<&str>) -> Vec<u8> {
    let aad = Aad {
        scope: "power-query-cache",
        schema_version: ENVELOPE_VERSION,
        store_id,
    };
    // serde_json's map/struct output is deterministic for a fixed struct
    // shape, which is all the canonicalization this AAD needs.
    serde_json::to_vec(&aad).expect("AAD struct always serializes")
}

pub struct Crypto {
    key: Key<Aes256Gcm>,
    key_version: u32,
}

impl Crypto {
    pub fn new(key_bytes: [u8; 32], key_version: u32) -> Self {
        Self {
            key: Key::<Aes256Gcm>::from_slice(&key_bytes).to_owned(),
            key_version,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8], store_id: Option<&str>) -> Result<Envelope, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut iv_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);
        let aad = build_aad(store_id);

        let ciphertext_with_tag = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - 16);

        Ok(Envelope {
            marker: ENVELOPE_MARKER.to_string(),
            v: ENVELOPE_VERSION,
            payload: EnvelopePayload {
                key_version: self.key_version,
                iv: iv_bytes.to_vec(),
                tag: tag.to_vec(),
                ciphertext: ciphertext.to_vec(),
            },
        })
    }

    pub fn decrypt(&self, envelope: &Envelope, store_id: Option<&str>) -> Result<Vec<u8>, CryptoError> {
        if envelope.v != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(envelope.v));
        }
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Nonce::from_slice(&envelope.payload.iv);
        let aad = build_aad(store_id);

        let mut combined = envelope.payload.ciphertext.clone();
        combined.extend_from_slice(&envelope.payload.tag);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> Crypto {
        Crypto::new([7u8; 32], 1)
    }

    #[test]
    fn round_trips() {
        let crypto = crypto();
        let envelope = crypto.encrypt(b"hello world", Some("store-a")).unwrap();
        let plaintext = crypto.decrypt(&envelope, Some("store-a")).unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn bit_flip_breaks_decrypt() {
        let crypto = crypto();
        let mut envelope = crypto.encrypt(b"hello world", None).unwrap();
        envelope.payload.ciphertext[0] ^= 0x01;
        assert!(crypto.decrypt(&envelope, None).is_err());
    }

    #[test]
    fn mismatched_store_id_fails() {
        let crypto = crypto();
        let envelope = crypto.encrypt(b"hello world", Some("store-a")).unwrap();
        assert!(crypto.decrypt(&envelope, Some("store-b")).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let crypto_a = Crypto::new([1u8; 32], 1);
        let crypto_b = Crypto::new([2u8; 32], 1);
        let envelope = crypto_a.encrypt(b"secret", None).unwrap();
        assert!(crypto_b.decrypt(&envelope, None).is_err());
    }

    #[test]
    fn unknown_version_is_rejected_without_panic() {
        let crypto = crypto();
        let mut envelope = crypto.encrypt(b"x", None).unwrap();
        envelope.v = 99;
        assert!(matches!(
            crypto.decrypt(&envelope, None),
            Err(CryptoError::UnsupportedVersion(99))
        ));
    }
}
