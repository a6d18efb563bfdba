//! Authenticated API clients and the per-tenant client cache.
//!
//! Feature handlers only ever call [`ClientCache::client_for`] and
//! [`describe`](crate::resilience::describe) on the errors they get back.

mod api_client;
mod cache;

pub use api_client::{ApiClient, ClientOptions, DEFAULT_API_BASE_URL};
pub use cache::{ClientCache, ClientInvalidator};
