//! Test doubles shared by unit tests across modules.

use crate::credentials::{CredentialStore, Credentials, StoreError};
use crate::oauth::{ExchangeError, TokenEndpoint};
use crate::token::{TokenError, TokenSource};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A bundle valid for an hour with a refresh token.
pub fn credentials(access_token: &str) -> Credentials {
    Credentials {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh-token".to_string()),
        token_type: "Bearer".to_string(),
        expires_at: Some(Utc::now() + Duration::hours(1)),
    }
}

fn invalid_grant() -> ExchangeError {
    ExchangeError::Rejected {
        status: StatusCode::BAD_REQUEST,
        message: "invalid_grant: Token has been expired or revoked.".to_string(),
    }
}

/// In-process token endpoint.
///
/// `exchange_code` issues a fixed access token; `refresh` issues
/// `refreshed-1`, `refreshed-2`, ... without rotating the refresh token.
pub struct StubEndpoint {
    issued: Option<String>,
    refresh_delay: Option<std::time::Duration>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    refresh_finished: AtomicUsize,
}

impl StubEndpoint {
    pub fn issuing(access_token: &str) -> Self {
        Self {
            issued: Some(access_token.to_string()),
            refresh_delay: None,
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_finished: AtomicUsize::new(0),
        }
    }

    /// Endpoint that answers every call with `invalid_grant`.
    pub fn rejecting() -> Self {
        Self {
            issued: None,
            ..Self::issuing("")
        }
    }

    /// Makes each refresh take `delay` before answering.
    pub fn with_refresh_delay(self, delay: std::time::Duration) -> Self {
        Self {
            refresh_delay: Some(delay),
            ..self
        }
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Refreshes started.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Refreshes that ran to completion.
    pub fn refresh_finished(&self) -> usize {
        self.refresh_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for StubEndpoint {
    async fn exchange_code(&self, _code: &str) -> Result<Credentials, ExchangeError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        match &self.issued {
            Some(token) => Ok(credentials(token)),
            None => Err(invalid_grant()),
        }
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credentials, ExchangeError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.issued.is_none() {
            return Err(invalid_grant());
        }
        match self.refresh_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            // yield so concurrent callers actually interleave
            None => tokio::task::yield_now().await,
        }
        self.refresh_finished.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials {
            refresh_token: None,
            ..credentials(&format!("refreshed-{}", n))
        })
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl CredentialStore for FailingStore {
    fn save(&self, _tenant: &str, _credentials: &Credentials) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("storage unavailable")))
    }

    fn load(&self, _tenant: &str) -> Result<Credentials, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("storage unavailable")))
    }

    fn delete(&self, _tenant: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("storage unavailable")))
    }
}

/// Wraps a store and counts the calls that reach it.
pub struct CountingStore<S> {
    inner: S,
    saves: AtomicUsize,
    loads: AtomicUsize,
}

impl<S: CredentialStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            saves: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<S: CredentialStore> CredentialStore for CountingStore<S> {
    fn save(&self, tenant: &str, credentials: &Credentials) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(tenant, credentials)
    }

    fn load(&self, tenant: &str) -> Result<Credentials, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(tenant)
    }

    fn delete(&self, tenant: &str) -> Result<bool, StoreError> {
        self.inner.delete(tenant)
    }
}

/// Token source that plays back a fixed sequence of access tokens, then
/// keeps returning the last one.
pub struct ScriptedSource {
    script: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    fail: bool,
}

impl ScriptedSource {
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            script: Mutex::new(tokens.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            fail: false,
        }
    }

    pub fn repeating(token: &str) -> Self {
        Self::new([token])
    }

    /// Source whose every call fails with a refresh error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::<String>::new())
        }
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn token(&self) -> Result<Credentials, TokenError> {
        if self.fail {
            return Err(TokenError::Refresh {
                tenant: "scripted".to_string(),
                source: invalid_grant(),
            });
        }
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(token) = next {
            *last = Some(token);
        }
        let token = last.clone().unwrap_or_else(|| "scripted-token".to_string());
        Ok(credentials(&token))
    }
}
