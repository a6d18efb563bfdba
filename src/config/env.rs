use super::{StorageBackend, UsergateConfig};
use std::path::PathBuf;
use tracing::warn;

impl UsergateConfig {
    /// Apply `USERGATE_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`. Values that fail to parse are logged
    /// and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("USERGATE_CLIENT_ID") {
            self.oauth.client_id = v;
        }
        if let Some(v) = lookup("USERGATE_CLIENT_SECRET") {
            self.oauth.client_secret = v;
        }
        if let Some(v) = lookup("USERGATE_REDIRECT_URL") {
            self.oauth.redirect_url = v;
        }
        if let Some(v) = lookup("USERGATE_SCOPES") {
            self.oauth.scopes = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("USERGATE_AUTH_URL") {
            self.oauth.auth_url = v;
        }
        if let Some(v) = lookup("USERGATE_TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = lookup("USERGATE_API_BASE_URL") {
            self.oauth.api_base_url = v;
        }
        if let Some(v) = lookup("USERGATE_STORAGE_BACKEND") {
            match v.parse::<StorageBackend>() {
                Ok(backend) => self.storage.backend = backend,
                Err(e) => warn!(error = %e, "Ignoring USERGATE_STORAGE_BACKEND"),
            }
        }
        if let Some(v) = lookup("USERGATE_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("USERGATE_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(v);
        }
        if let Some(v) = lookup("USERGATE_STATE_KEY") {
            self.state.signing_key = Some(v);
        }
        if let Some(v) = lookup("USERGATE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("USERGATE_MAX_RETRIES") {
            match v.parse::<u32>() {
                Ok(n) => self.retry.max_retries = n,
                Err(_) => warn!(value = %v, "Ignoring USERGATE_MAX_RETRIES: not a number"),
            }
        }
        if let Some(v) = lookup("USERGATE_RETRY_BASE_DELAY_MS") {
            match v.parse::<u64>() {
                Ok(n) => self.retry.base_delay_ms = n,
                Err(_) => warn!(value = %v, "Ignoring USERGATE_RETRY_BASE_DELAY_MS: not a number"),
            }
        }
    }
}
