//! Token source that writes each new access token back to the credential store.

use super::{TokenError, TokenSource};
use crate::credentials::{run_blocking, CredentialStore, Credentials};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Wraps a token source and persists the bundle whenever the access token
/// differs from the last one this instance saw.
///
/// Persistence is best-effort: a failed save is logged and counted, and the
/// token is still returned. The remembered token only advances after a
/// successful save, so the next call retries the write.
pub struct PersistingTokenSource<S> {
    tenant: String,
    inner: S,
    store: Arc<dyn CredentialStore>,
    last_token: Mutex<Option<String>>,
    persist_failures: AtomicU64,
}

impl<S: TokenSource> PersistingTokenSource<S> {
    pub fn new(tenant: impl Into<String>, inner: S, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            tenant: tenant.into(),
            inner,
            store,
            last_token: Mutex::new(None),
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Marks `access_token` as already persisted (e.g. the bundle just loaded
    /// from the store), so returning it does not trigger a write.
    pub fn seeded(self, access_token: impl Into<String>) -> Self {
        Self {
            last_token: Mutex::new(Some(access_token.into())),
            ..self
        }
    }

    /// Number of saves that failed since construction.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<S: TokenSource> TokenSource for PersistingTokenSource<S> {
    async fn token(&self) -> Result<Credentials, TokenError> {
        // Held across the inner call as well as the compare-and-save: a
        // caller that fetched an older bundle can never write it back over a
        // newer one, and two callers seeing the same new token write it once.
        let mut last = self.last_token.lock().await;
        let credentials = self.inner.token().await?;
        if last.as_deref() == Some(credentials.access_token.as_str()) {
            return Ok(credentials);
        }

        let (tenant, bundle) = (self.tenant.clone(), credentials.clone());
        match run_blocking(&self.store, move |store| store.save(&tenant, &bundle)).await {
            Ok(()) => {
                debug!(tenant = %self.tenant, "Persisted refreshed credentials");
                *last = Some(credentials.access_token.clone());
            }
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tenant = %self.tenant,
                    error = %e,
                    "Failed to persist refreshed credentials; continuing with in-memory token"
                );
            }
        }

        Ok(credentials)
    }
}
