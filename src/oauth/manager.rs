//! Authorization manager: builds authorization URLs, verifies returning
//! states, and turns authorization codes into stored credentials.

use super::{ExchangeError, HttpTokenEndpoint, ProviderConfig, StateSigner, TokenEndpoint};
use crate::credentials::{run_blocking, CredentialStore, Credentials, StoreError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Authorization handshake errors. Each message tells the user what to do next.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identifier cannot be carried in a signed state.
    #[error("invalid tenant identifier {0:?}: it must be non-empty and must not contain ':'")]
    InvalidTenant(String),

    /// The returning `state` was not issued by this deployment.
    #[error("invalid or tampered authorization state; start the authorization again")]
    InvalidState,

    /// The provider refused the authorization code.
    #[error("failed to exchange authorization code: {0}; start the authorization again")]
    Exchange(#[source] ExchangeError),

    /// The exchange worked but the credentials could not be stored.
    #[error("authorization succeeded but credentials could not be saved: {0}; retry once storage is available")]
    Persist(#[source] StoreError),
}

/// Owns the credential store, the state signer and the provider registration.
pub struct AuthManager {
    provider: ProviderConfig,
    signer: StateSigner,
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl AuthManager {
    pub fn new(
        provider: ProviderConfig,
        signer: StateSigner,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            provider,
            signer,
            store,
            endpoint,
        }
    }

    /// Manager talking to the provider's token endpoint over HTTP.
    pub fn with_http_endpoint(
        provider: ProviderConfig,
        signer: StateSigner,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
    ) -> Self {
        let endpoint = Arc::new(HttpTokenEndpoint::new(http, provider.clone()));
        Self::new(provider, signer, store, endpoint)
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn endpoint(&self) -> &Arc<dyn TokenEndpoint> {
        &self.endpoint
    }

    /// Authorization URL for `tenant`, carrying a signed state.
    pub fn auth_url(&self, tenant: &str) -> Result<String, AuthError> {
        if tenant.is_empty() || tenant.contains(':') {
            return Err(AuthError::InvalidTenant(tenant.to_string()));
        }
        let state = self.signer.sign(tenant);
        Ok(self.provider.build_auth_url(&state))
    }

    /// Verifies a returning state and extracts the tenant it was issued for.
    pub fn verify_and_extract_tenant(&self, state: &str) -> Option<String> {
        self.signer.verify(state)
    }

    /// Exchanges `code` and persists the resulting bundle for `tenant` before
    /// returning it.
    ///
    /// Callers holding a [`ClientCache`](crate::client::ClientCache) must
    /// invalidate `tenant` afterwards so cached clients pick up the new grant.
    pub async fn exchange_code(&self, code: &str, tenant: &str) -> Result<Credentials, AuthError> {
        debug!(tenant = %tenant, "Exchanging authorization code");

        let credentials = self.endpoint.exchange_code(code).await.map_err(|e| {
            error!(tenant = %tenant, error = %e, "Token exchange failed");
            AuthError::Exchange(e)
        })?;

        if credentials.refresh_token.is_none() {
            warn!(tenant = %tenant, "Provider issued no refresh token; access will lapse at expiry");
        }

        let (owned_tenant, bundle) = (tenant.to_string(), credentials.clone());
        run_blocking(&self.store, move |store| store.save(&owned_tenant, &bundle))
            .await
            .map_err(|e| {
                error!(tenant = %tenant, error = %e, "Failed to store credentials");
                AuthError::Persist(e)
            })?;

        info!(
            tenant = %tenant,
            has_refresh_token = credentials.refresh_token.is_some(),
            "Authorization completed"
        );
        Ok(credentials)
    }

    /// Verifies `state` and only then exchanges `code` for the tenant it names.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<(String, Credentials), AuthError> {
        let tenant = self.verify_and_extract_tenant(state).ok_or_else(|| {
            warn!("Rejected authorization callback with invalid state");
            AuthError::InvalidState
        })?;
        let credentials = self.exchange_code(code, &tenant).await?;
        Ok((tenant, credentials))
    }

    /// Loads the stored bundle for `tenant`.
    pub fn load(&self, tenant: &str) -> Result<Credentials, StoreError> {
        self.store.load(tenant)
    }

    /// Forgets the stored bundle for `tenant`. Cached clients keep working
    /// until invalidated.
    pub fn revoke(&self, tenant: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(tenant)?;
        if removed {
            info!(tenant = %tenant, "Removed stored credentials");
        }
        Ok(removed)
    }
}
