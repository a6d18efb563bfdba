//! OAuth 2.0 authorization code flow for per-tenant credentials.
//!
//! 1. A feature handler finds no credentials for tenant T and surfaces
//!    [`AuthManager::auth_url`], which carries a signed `state`
//! 2. The user authorizes on the provider's site
//! 3. The provider redirects to the callback with `code` and `state`
//! 4. The callback verifies `state`, calls [`AuthManager::exchange_code`]
//!    (which stores the credentials) and invalidates T's cached client
//! 5. The next client lookup for T builds from the fresh credentials

mod exchange;
mod manager;
mod provider;
mod state;

pub use exchange::{ExchangeError, HttpTokenEndpoint, TokenEndpoint};
pub use manager::{AuthError, AuthManager};
pub use provider::{ProviderConfig, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
pub use state::StateSigner;
