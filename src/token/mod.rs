//! Access token sources.
//!
//! ```text
//! ApiClient ──token()──▶ PersistingTokenSource ──▶ RefreshingTokenSource ──▶ TokenEndpoint
//!                               │
//!                               └── save() on access-token change ──▶ CredentialStore
//! ```
//!
//! Both sources are built once per tenant by the client cache and live as long
//! as the cached client. Cancelling one API call never cancels them: a
//! refresh runs on its own task and completes even if every waiter is gone.

mod persisting;
mod refreshing;

pub use persisting::PersistingTokenSource;
pub use refreshing::{RefreshingTokenSource, REFRESH_THRESHOLD_SECS};

use crate::credentials::Credentials;
use crate::oauth::ExchangeError;
use async_trait::async_trait;

/// Token source failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The access token expired and there is no refresh token to renew it.
    #[error("access token for {tenant} expired and cannot be refreshed")]
    Expired { tenant: String },

    /// The provider refused or failed the refresh.
    #[error("failed to refresh access token for {tenant}: {source}")]
    Refresh {
        tenant: String,
        #[source]
        source: ExchangeError,
    },

    /// The background refresh task panicked or the runtime shut down under it.
    #[error("token refresh for {tenant} did not complete: {reason}")]
    Interrupted { tenant: String, reason: String },
}

/// Yields a currently valid credential bundle.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Credentials, TokenError>;
}
