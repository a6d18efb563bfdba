mod env;

use crate::client::{ClientOptions, DEFAULT_API_BASE_URL};
use crate::credentials::{
    CredentialStore, EncryptionKey, FileCredentialStore, MemoryCredentialStore,
    SqliteCredentialStore,
};
use crate::oauth::{ProviderConfig, StateSigner, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use crate::resilience::RetryPolicy;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Complete usergate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsergateConfig {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Client registration with the identity provider
#[derive(Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Root of the remote API the cached clients call
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_redirect_url() -> String {
    "http://localhost:8080/oauth/callback".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string()]
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: default_redirect_url(),
            scopes: default_scopes(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("unknown storage backend '{}' (expected file, sqlite or memory)", other),
        }
    }
}

/// Credential storage configuration
#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the file backend, database file for sqlite
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Base64-encoded 32-byte key. Optional for the file backend, required
    /// for sqlite.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./credentials")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// State signing configuration
#[derive(Clone, Default, Deserialize)]
pub struct StateConfig {
    /// HMAC key for the `state` parameter. Without one, an ephemeral key is
    /// generated and in-flight authorizations do not survive a restart.
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl std::fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Callback server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Rate-limit retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<UsergateConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: UsergateConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    Ok(config)
}

impl UsergateConfig {
    /// Fails when the provider registration is incomplete or the storage
    /// settings cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() {
            bail!("OAuth client_id is not configured. Set [oauth] client_id or USERGATE_CLIENT_ID.");
        }
        if self.oauth.client_secret.is_empty() {
            bail!(
                "OAuth client_secret is not configured. Set [oauth] client_secret or USERGATE_CLIENT_SECRET."
            );
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.encryption_key.is_none() {
            bail!(
                "The sqlite backend requires an encryption key. Set [storage] encryption_key or USERGATE_ENCRYPTION_KEY."
            );
        }
        Ok(())
    }

    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig {
            auth_url: self.oauth.auth_url.clone(),
            token_url: self.oauth.token_url.clone(),
            client_id: self.oauth.client_id.clone(),
            client_secret: self.oauth.client_secret.clone(),
            redirect_url: self.oauth.redirect_url.clone(),
            scopes: self.oauth.scopes.clone(),
        }
    }

    pub fn client_options(&self, http: reqwest::Client) -> ClientOptions {
        ClientOptions {
            base_url: self.oauth.api_base_url.clone(),
            retry: self.retry.policy(),
            http,
        }
    }

    pub fn signer(&self) -> Result<StateSigner> {
        match &self.state.signing_key {
            Some(key) => StateSigner::new(key.as_bytes()).context("Invalid state signing key"),
            None => {
                warn!("No state signing key configured; using an ephemeral key. Authorizations in flight will fail after a restart.");
                StateSigner::random()
            }
        }
    }

    /// Opens the configured credential store.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let key = self
            .storage
            .encryption_key
            .as_deref()
            .map(EncryptionKey::from_base64)
            .transpose()
            .context("Invalid storage encryption key")?;

        let store: Arc<dyn CredentialStore> = match self.storage.backend {
            StorageBackend::File => {
                if key.is_none() {
                    warn!("Credential records are stored unencrypted; protection relies on file permissions");
                }
                Arc::new(FileCredentialStore::open(&self.storage.path, key)?)
            }
            StorageBackend::Sqlite => {
                let key = key.context("The sqlite backend requires an encryption key")?;
                Arc::new(SqliteCredentialStore::open(&self.storage.path, key)?)
            }
            StorageBackend::Memory => {
                warn!("Using in-memory credential store; credentials are lost on restart");
                Arc::new(MemoryCredentialStore::new())
            }
        };

        info!(
            backend = ?self.storage.backend,
            path = %self.storage.path.display(),
            "Credential store ready"
        );
        Ok(store)
    }
}
