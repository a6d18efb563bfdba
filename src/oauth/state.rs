//! Signed OAuth `state` values for CSRF protection.
//!
//! The state carries the tenant identifier through the provider redirect
//! without any server-side session: `<tenant>:<hex hmac-sha256(tenant)>`.
//! Verification recomputes the MAC with the deployment key and compares in
//! constant time.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an HMAC-SHA256 tag.
const MAC_HEX_LEN: usize = 64;

/// Produces and verifies signed state tokens.
#[derive(Clone)]
pub struct StateSigner {
    mac: HmacSha256,
}

impl StateSigner {
    /// Creates a signer from the deployment's signing key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(anyhow!("State signing key must not be empty"));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| anyhow!("Invalid state signing key: {}", e))?;
        Ok(Self { mac })
    }

    /// Creates a signer with a random 256-bit key.
    ///
    /// States signed by it stop verifying once the process restarts.
    pub fn random() -> Result<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key)
    }

    /// Signs `tenant`, returning `<tenant>:<hex mac>`.
    pub fn sign(&self, tenant: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(tenant.as_bytes());
        format!("{}:{}", tenant, hex::encode(mac.finalize().into_bytes()))
    }

    /// Verifies a state value and returns the tenant it was issued for.
    ///
    /// Returns `None` for anything that is not exactly `<tenant>:<64 lowercase
    /// hex>` with a MAC produced by this signer's key.
    pub fn verify(&self, state: &str) -> Option<String> {
        let (tenant, signature) = state.split_once(':')?;

        if tenant.is_empty() || signature.contains(':') || !is_lower_hex(signature, MAC_HEX_LEN) {
            return None;
        }
        let signature = hex::decode(signature).ok()?;

        let mut mac = self.mac.clone();
        mac.update(tenant.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&signature).ok()?;

        Some(tenant.to_string())
    }
}

impl fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateSigner(<redacted>)")
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
