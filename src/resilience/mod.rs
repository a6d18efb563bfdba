//! Remote error classification and rate-limit retry.
//!
//! Remote failures are classified once, where the response is read, into
//! [`ApiError`]. Only [`ApiError::RateLimited`] is retried; every backoff
//! wait can be interrupted by the caller's cancellation token.

mod errors;
mod retry;

pub use errors::{classify, classify_error, describe, ApiError, RemoteError};
pub use retry::{retry, RetryPolicy};
