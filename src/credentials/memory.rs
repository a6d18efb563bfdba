//! In-memory credential store for tests and persistence-free deployments.

use super::{tenant_key, CredentialStore, Credentials, StoreError};
use dashmap::DashMap;

/// Credential store backed by a sharded concurrent map.
///
/// Contents are lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tenants with stored credentials.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, tenant: &str, credentials: &Credentials) -> Result<(), StoreError> {
        self.records.insert(tenant_key(tenant), credentials.clone());
        Ok(())
    }

    fn load(&self, tenant: &str) -> Result<Credentials, StoreError> {
        self.records
            .get(&tenant_key(tenant))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotAuthenticated {
                tenant: tenant.to_string(),
            })
    }

    fn delete(&self, tenant: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(&tenant_key(tenant)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn creds(token: &str) -> Credentials {
        Credentials {
            access_token: token.to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryCredentialStore::new();
        store.save("user@example.com", &creds("abc")).unwrap();

        assert_eq!(store.load("user@example.com").unwrap(), creds("abc"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_tenant() {
        let store = MemoryCredentialStore::new();
        let err = store.load("user@example.com").unwrap_err();
        assert!(err.is_not_authenticated());
        assert!(err.to_string().contains("user@example.com"));
    }

    #[test]
    fn test_delete() {
        let store = MemoryCredentialStore::new();
        store.save("user@example.com", &creds("abc")).unwrap();

        assert!(store.delete("user@example.com").unwrap());
        assert!(!store.delete("user@example.com").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_save_and_load() {
        let store = Arc::new(MemoryCredentialStore::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let tenant = format!("user{}@example.com", i);
                    for round in 0..50 {
                        let token = format!("token-{}-{}", i, round);
                        store.save(&tenant, &creds(&token)).unwrap();
                        assert_eq!(store.load(&tenant).unwrap().access_token, token);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 16);
    }
}
