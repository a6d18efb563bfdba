// Stored per-tenant credentials
pub mod credentials;

// Authorization handshake and token endpoint
pub mod oauth;

// Refreshing and persisting token sources
pub mod token;

// Error classification and rate-limit retry
pub mod resilience;

// Authenticated clients and the per-tenant cache
pub mod client;

// OAuth callback HTTP endpoints
pub mod api;

// Configuration file and environment overrides
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ApiClient, ClientCache, ClientInvalidator, ClientOptions};
pub use credentials::{CredentialStore, Credentials, StoreError};
pub use oauth::{AuthError, AuthManager, ProviderConfig, StateSigner};
pub use resilience::{describe, ApiError, RetryPolicy};
