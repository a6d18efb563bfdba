//! Per-tenant cache of authenticated clients.

use super::{ApiClient, ClientOptions};
use crate::credentials::run_blocking;
use crate::oauth::AuthManager;
use crate::resilience::ApiError;
use crate::token::{PersistingTokenSource, RefreshingTokenSource};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Drops a tenant's cached client so the next lookup rebuilds it from the
/// store. The callback handler calls this after re-authorization.
#[async_trait]
pub trait ClientInvalidator: Send + Sync {
    async fn invalidate(&self, tenant: &str);
}

/// Maps tenant → ready-to-use [`ApiClient`].
///
/// Lookups take a read lock. A miss serialises builders for that tenant on
/// a per-tenant slot, then reads the store and builds the client without
/// holding the map lock, so a slow build never blocks other tenants. Slots
/// exist only while a build for the tenant is running or queued.
pub struct ClientCache {
    auth: Arc<AuthManager>,
    options: ClientOptions,
    clients: RwLock<HashMap<String, Arc<ApiClient>>>,
    building: DashMap<String, Arc<BuildSlot>>,
}

#[derive(Default)]
struct BuildSlot {
    lock: Mutex<()>,
    // Bumped on invalidation; a build that straddles one is not cached.
    generation: AtomicU64,
}

impl ClientCache {
    pub fn new(auth: Arc<AuthManager>, options: ClientOptions) -> Self {
        Self {
            auth,
            options,
            clients: RwLock::new(HashMap::new()),
            building: DashMap::new(),
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Client for `tenant`, built from stored credentials on first use.
    ///
    /// Fails with [`ApiError::NotAuthenticated`] carrying an authorization
    /// URL when nothing is stored for the tenant.
    pub async fn client_for(&self, tenant: &str) -> Result<Arc<ApiClient>, ApiError> {
        if let Some(client) = self.clients.read().await.get(tenant) {
            return Ok(Arc::clone(client));
        }

        let slot = self.building.entry(tenant.to_string()).or_default().clone();
        let result = self.build_in(&slot, tenant).await;

        // Last one out removes the slot. Cloning a slot and removing it both
        // hold the shard lock, so a slot in use is never dropped from the map.
        drop(slot);
        self.building
            .remove_if(tenant, |_, slot| Arc::strong_count(slot) == 1);

        result
    }

    async fn build_in(&self, slot: &BuildSlot, tenant: &str) -> Result<Arc<ApiClient>, ApiError> {
        let _building = slot.lock.lock().await;

        // Another caller may have finished the build while we waited
        if let Some(client) = self.clients.read().await.get(tenant) {
            return Ok(Arc::clone(client));
        }

        let generation = slot.generation.load(Ordering::SeqCst);
        let client = Arc::new(self.build(tenant).await?);

        let mut clients = self.clients.write().await;
        if slot.generation.load(Ordering::SeqCst) == generation {
            clients.insert(tenant.to_string(), Arc::clone(&client));
            debug!(tenant = %tenant, "Cached API client");
        } else {
            debug!(tenant = %tenant, "Client invalidated during build; not caching");
        }

        Ok(client)
    }

    async fn build(&self, tenant: &str) -> Result<ApiClient, ApiError> {
        let owned_tenant = tenant.to_string();
        let loaded = run_blocking(self.auth.store(), move |store| store.load(&owned_tenant)).await;
        let credentials = match loaded {
            Ok(credentials) => credentials,
            Err(e) if e.is_not_authenticated() => {
                let auth_url = self.auth.auth_url(tenant)?;
                info!(tenant = %tenant, "No stored credentials; authorization required");
                return Err(ApiError::NotAuthenticated {
                    tenant: tenant.to_string(),
                    auth_url,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let loaded_token = credentials.access_token.clone();
        let refreshing =
            RefreshingTokenSource::new(tenant, credentials, Arc::clone(self.auth.endpoint()));
        let tokens = PersistingTokenSource::new(tenant, refreshing, Arc::clone(self.auth.store()))
            .seeded(loaded_token);

        Ok(ApiClient::new(tenant, Arc::new(tokens), &self.options))
    }

    /// Removes `tenant`'s cached client. The next [`client_for`](Self::client_for)
    /// re-reads the store.
    pub async fn invalidate(&self, tenant: &str) {
        let mut clients = self.clients.write().await;
        // No slot means no build in flight that could cache stale credentials.
        if let Some(slot) = self.building.get(tenant) {
            slot.generation.fetch_add(1, Ordering::SeqCst);
        }
        if clients.remove(tenant).is_some() {
            info!(tenant = %tenant, "Invalidated cached API client");
        }
    }

    pub async fn is_cached(&self, tenant: &str) -> bool {
        self.clients.read().await.contains_key(tenant)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl ClientInvalidator for ClientCache {
    async fn invalidate(&self, tenant: &str) {
        ClientCache::invalidate(self, tenant).await;
    }
}
