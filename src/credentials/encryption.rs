//! AES-256-GCM sealing for credentials at rest.
//!
//! Every call to [`EncryptionKey::seal`] draws a fresh 96-bit nonce. The key is
//! supplied base64-encoded from configuration and lives in memory only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// A 256-bit master key for credential encryption.
#[derive(Clone)]
pub struct EncryptionKey {
    cipher: Aes256Gcm,
}

/// Ciphertext plus the nonce it was sealed with, both base64-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub nonce: String,
    pub ciphertext: String,
}

impl EncryptionKey {
    /// Decodes a base64 master key; it must be exactly 32 bytes.
    pub fn from_base64(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Failed to decode base64 encryption key")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        Self::from_bytes(&key_bytes)
    }

    fn from_bytes(key_bytes: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    /// Generates a random key and returns it base64-encoded, ready for config.
    pub fn generate_base64() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Sealed {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    /// Decrypts and authenticates a sealed value.
    ///
    /// Fails on a wrong key, a wrong nonce, or any tampering.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .context("Failed to decode nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;

        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))
    }

    /// [`seal`](Self::seal) for UTF-8 strings.
    pub fn seal_str(&self, plaintext: &str) -> Result<Sealed> {
        self.seal(plaintext.as_bytes())
    }

    /// [`open`](Self::open) for values sealed with [`seal_str`](Self::seal_str).
    pub fn open_str(&self, sealed: &Sealed) -> Result<String> {
        String::from_utf8(self.open(sealed)?).context("Decrypted data is not valid UTF-8")
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}
