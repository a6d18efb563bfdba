//! Per-tenant credential storage.
//!
//! One [`Credentials`] bundle is kept per tenant identifier. Backends implement
//! [`CredentialStore`]; every backend addresses records by [`tenant_key`], a
//! SHA-256 digest of the identifier, so the raw identifier never reaches a
//! filesystem path or a database key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (trait)            │
//! │  - save / load / delete                  │
//! └─────────────────────────────────────────┘
//!     ↓               ↓                ↓
//! ┌──────────┐  ┌──────────────┐  ┌──────────┐
//! │  File    │  │  SQLite      │  │  Memory  │
//! │  0700/600│  │  AES-256-GCM │  │  DashMap │
//! └──────────┘  └──────────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use usergate::credentials::{CredentialStore, Credentials, FileCredentialStore};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = FileCredentialStore::open("/var/lib/usergate/credentials", None)?;
//!
//! let creds = Credentials {
//!     access_token: "ya29.access".to_string(),
//!     refresh_token: Some("1//refresh".to_string()),
//!     token_type: "Bearer".to_string(),
//!     expires_at: Some(Utc::now() + Duration::hours(1)),
//! };
//! store.save("user@example.com", &creds)?;
//!
//! let loaded = store.load("user@example.com")?;
//! assert_eq!(loaded, creds);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Records are keyed by a fixed-length hash, never the raw tenant identifier
//! - File records are written owner-only (`0600`) inside an owner-only directory
//! - Optional AES-256-GCM encryption at rest with a unique nonce per write
//! - `Debug` output of [`Credentials`] never includes token values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

mod encryption;
mod file;
mod memory;
mod sqlite;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use sqlite::SqliteCredentialStore;

pub use encryption::{EncryptionKey, Sealed};

/// Token type assumed when a provider omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// One tenant's OAuth grant.
///
/// Owned by the credential store once persisted; the refresh pipeline holds a
/// transient copy between issuance and persistence.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived bearer secret used on API requests
    pub access_token: String,

    /// Long-lived secret used to obtain new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type reported by the provider (almost always "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// When the access token expires (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Credentials {
    /// Returns true if the access token expires within `leeway` of `now`.
    ///
    /// Bundles without an expiry are treated as never expiring.
    pub fn expires_within(&self, now: DateTime<Utc>, leeway: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + leeway,
            None => false,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No credential is stored for this tenant; the caller should offer an
    /// authorization URL rather than treat this as a fault.
    #[error("no stored credentials for {tenant}")]
    NotAuthenticated { tenant: String },

    /// A stored record exists but cannot be decoded or decrypted.
    #[error("stored credentials for {tenant} are unreadable: {reason}")]
    Corrupt { tenant: String, reason: String },

    /// Filesystem failure.
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure (database, encryption).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// True when the tenant simply has not authorized yet.
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, StoreError::NotAuthenticated { .. })
    }
}

/// Durable key/value persistence of one credential bundle per tenant.
///
/// For the same tenant the last `save` to complete wins; no versioning is
/// provided at this layer.
pub trait CredentialStore: Send + Sync {
    /// Stores (or replaces) the bundle for `tenant`.
    fn save(&self, tenant: &str, credentials: &Credentials) -> Result<(), StoreError>;

    /// Loads the bundle for `tenant`.
    ///
    /// Fails with [`StoreError::NotAuthenticated`] when nothing is stored.
    fn load(&self, tenant: &str) -> Result<Credentials, StoreError>;

    /// Removes the bundle for `tenant`. Returns false if nothing was stored.
    fn delete(&self, tenant: &str) -> Result<bool, StoreError>;
}

/// Derives the storage key for a tenant identifier.
///
/// Lowercase hex SHA-256 of the identifier bytes: 64 characters, stable across
/// calls and processes, and safe to use as a file name.
pub fn tenant_key(tenant: &str) -> String {
    hex::encode(Sha256::digest(tenant.as_bytes()))
}

/// Runs a store operation on the blocking thread pool.
///
/// File and SQLite backends fsync and take a connection lock; async callers
/// go through here instead of calling the store on a runtime worker.
pub async fn run_blocking<T, F>(store: &Arc<dyn CredentialStore>, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CredentialStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("credential store task failed: {}", e)))?
}
