//! Authenticated HTTP client for one tenant.

use crate::credentials::Credentials;
use crate::resilience::{classify, retry, ApiError, RemoteError, RetryPolicy};
use crate::token::TokenSource;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default remote API root.
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";

/// Settings shared by every client the cache builds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub retry: RetryPolicy,
    pub http: reqwest::Client,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        }
    }
}

/// Calls the remote API as one tenant.
///
/// The client and its token source live as long as the cache entry. Each
/// call takes its own cancellation token; cancelling a call leaves the
/// client usable.
pub struct ApiClient {
    tenant: String,
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        tenant: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        options: &ClientOptions,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            http: options.http.clone(),
            base_url: options.base_url.trim_end_matches('/').to_string(),
            tokens,
            retry: options.retry,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A currently valid credential bundle, refreshed if needed.
    pub async fn token(&self) -> Result<Credentials, ApiError> {
        Ok(self.tokens.token().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends one request with a fresh bearer token. Non-2xx answers come
    /// back classified.
    ///
    /// Cancelling `cancel` abandons this call only. A token refresh it was
    /// waiting on keeps running and is shared with the next caller.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ApiError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = self.send_once(method, path, body) => result,
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let credentials = self.tokens.token().await?;

        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(&credentials.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let remote = RemoteError::from_response(response).await;
        debug!(
            tenant = %self.tenant,
            method = %method,
            path = %path,
            status = remote.status.as_u16(),
            "Remote API call failed"
        );
        Err(classify(remote))
    }

    /// [`send`](Self::send), retrying rate-limited answers per the client's
    /// retry policy.
    pub async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ApiError> {
        retry(&self.retry, cancel, move || {
            self.send(method.clone(), path, body, cancel)
        })
        .await
    }

    /// GET `path` and decode the JSON answer.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let response = self.send_with_retry(Method::GET, path, None, cancel).await?;
        Ok(response.json::<T>().await?)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("tenant", &self.tenant)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
