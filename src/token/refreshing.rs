//! Token source that refreshes an access token shortly before it expires.

use super::{TokenError, TokenSource};
use crate::credentials::Credentials;
use crate::oauth::TokenEndpoint;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Refresh when the access token expires within this many seconds.
pub const REFRESH_THRESHOLD_SECS: i64 = 90;

/// Holds one tenant's current bundle and renews it through the provider.
///
/// Concurrent callers share one refresh: the bundle lock is held across the
/// endpoint call, so callers queued behind it see the renewed token. The
/// refresh itself runs on a spawned task; a caller that is dropped while
/// waiting leaves it running, so a grant already sent to the provider is
/// never lost halfway.
pub struct RefreshingTokenSource {
    shared: Arc<Shared>,
    threshold: Duration,
}

struct Shared {
    tenant: String,
    endpoint: Arc<dyn TokenEndpoint>,
    current: Mutex<Credentials>,
}

impl RefreshingTokenSource {
    pub fn new(tenant: impl Into<String>, credentials: Credentials, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tenant: tenant.into(),
                endpoint,
                current: Mutex::new(credentials),
            }),
            threshold: Duration::seconds(REFRESH_THRESHOLD_SECS),
        }
    }

    /// Overrides the refresh threshold.
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl TokenSource for RefreshingTokenSource {
    async fn token(&self) -> Result<Credentials, TokenError> {
        {
            let current = self.shared.current.lock().await;
            if !current.expires_within(Utc::now(), self.threshold) {
                return Ok(current.clone());
            }
        }

        let shared = Arc::clone(&self.shared);
        let threshold = self.threshold;
        tokio::spawn(async move { shared.refresh_if_due(threshold).await })
            .await
            .map_err(|e| {
                warn!(tenant = %self.shared.tenant, error = %e, "Token refresh task failed");
                TokenError::Interrupted {
                    tenant: self.shared.tenant.clone(),
                    reason: e.to_string(),
                }
            })?
    }
}

impl Shared {
    async fn refresh_if_due(&self, threshold: Duration) -> Result<Credentials, TokenError> {
        let mut current = self.current.lock().await;
        let now = Utc::now();

        // Another task may have refreshed while this one waited for the lock.
        if !current.expires_within(now, threshold) {
            return Ok(current.clone());
        }

        let refresh_token = match &current.refresh_token {
            Some(token) => token.clone(),
            None if current.expires_within(now, Duration::zero()) => {
                warn!(tenant = %self.tenant, "Access token expired and no refresh token is stored");
                return Err(TokenError::Expired {
                    tenant: self.tenant.clone(),
                });
            }
            // Still valid for a little while; nothing to refresh with.
            None => return Ok(current.clone()),
        };

        debug!(tenant = %self.tenant, "Refreshing access token");
        let mut renewed = self
            .endpoint
            .refresh(&refresh_token)
            .await
            .map_err(|source| {
                warn!(tenant = %self.tenant, error = %source, "Token refresh failed");
                TokenError::Refresh {
                    tenant: self.tenant.clone(),
                    source,
                }
            })?;

        // Keep the existing refresh token if the provider did not rotate it
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }

        info!(tenant = %self.tenant, "Access token refreshed");
        *current = renewed.clone();
        Ok(renewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEndpoint;

    fn bundle(expires_in: i64, refresh: Option<&str>) -> Credentials {
        Credentials {
            access_token: "original".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
        }
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_without_refresh() {
        let endpoint = Arc::new(StubEndpoint::issuing("unused"));
        let source = RefreshingTokenSource::new("t@example.com", bundle(3600, Some("r")), endpoint.clone());

        assert_eq!(source.token().await.unwrap().access_token, "original");
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_token_near_expiry_is_refreshed_once() {
        let endpoint = Arc::new(StubEndpoint::issuing("unused"));
        let source = RefreshingTokenSource::new("t@example.com", bundle(30, Some("r")), endpoint.clone());

        let first = source.token().await.unwrap();
        assert_eq!(first.access_token, "refreshed-1");
        // refresh token kept when the provider does not rotate it
        assert_eq!(first.refresh_token.as_deref(), Some("r"));

        let second = source.token().await.unwrap();
        assert_eq!(second.access_token, "refreshed-1");
        assert_eq!(endpoint.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let endpoint = Arc::new(StubEndpoint::issuing("unused"));
        let source = Arc::new(RefreshingTokenSource::new(
            "t@example.com",
            bundle(-10, Some("r")),
            endpoint.clone(),
        ));

        let calls = (0..8).map(|_| {
            let source = Arc::clone(&source);
            async move { source.token().await.unwrap().access_token }
        });
        let tokens = futures::future::join_all(calls).await;

        assert!(tokens.iter().all(|t| t == "refreshed-1"));
        assert_eq!(endpoint.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let endpoint = Arc::new(StubEndpoint::issuing("unused"));
        let source = RefreshingTokenSource::new("t@example.com", bundle(-10, None), endpoint);

        let err = source.token().await.unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_nearly_expired_without_refresh_token_still_usable() {
        let endpoint = Arc::new(StubEndpoint::issuing("unused"));
        let source = RefreshingTokenSource::new("t@example.com", bundle(30, None), endpoint);

        assert_eq!(source.token().await.unwrap().access_token, "original");
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates() {
        let endpoint = Arc::new(StubEndpoint::rejecting());
        let source = RefreshingTokenSource::new("t@example.com", bundle(-10, Some("r")), endpoint);

        let err = source.token().await.unwrap_err();
        match err {
            TokenError::Refresh { source, .. } => assert!(source.is_invalid_grant()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_does_not_abort_refresh() {
        let endpoint = Arc::new(
            StubEndpoint::issuing("unused").with_refresh_delay(std::time::Duration::from_millis(200)),
        );
        let source = RefreshingTokenSource::new("t@example.com", bundle(-10, Some("r")), endpoint.clone());

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(20), source.token()).await;
        assert!(abandoned.is_err());
        assert_eq!(endpoint.refresh_calls(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(endpoint.refresh_finished(), 1);

        // the renewed bundle was kept; no second refresh is needed
        assert_eq!(source.token().await.unwrap().access_token, "refreshed-1");
        assert_eq!(endpoint.refresh_calls(), 1);
    }
}
