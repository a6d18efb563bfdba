//! OAuth token endpoint calls.
//!
//! Handles exchanging authorization codes and refresh tokens for access
//! tokens. Token values never appear in errors or logs.

use super::ProviderConfig;
use crate::credentials::{Credentials, DEFAULT_TOKEN_TYPE};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_credentials(self) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self
                .token_type
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at: self
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        }
    }
}

/// OAuth error response body (RFC 6749 §5.2)
#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The request never produced a response.
    #[error("token endpoint unreachable: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("token endpoint returned {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    /// The provider answered 2xx with an unparseable body.
    #[error("token endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// True when the provider says the code or refresh token is no longer
    /// valid, which only re-authorization can fix.
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            ExchangeError::Rejected { message, .. } => message.starts_with("invalid_grant"),
            _ => false,
        }
    }
}

/// A provider token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for a credential bundle.
    async fn exchange_code(&self, code: &str) -> Result<Credentials, ExchangeError>;

    /// Obtains a new access token with a refresh token.
    ///
    /// The returned bundle's `refresh_token` is `None` when the provider did
    /// not rotate it.
    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ExchangeError>;
}

/// [`TokenEndpoint`] speaking form-encoded OAuth 2.0 over HTTP.
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl HttpTokenEndpoint {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    async fn post(&self, form: HashMap<&str, &str>) -> Result<Credentials, ExchangeError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ExchangeError::Rejected {
                status,
                message: error_message(&body),
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            "Token endpoint call successful"
        );

        Ok(token_response.into_credentials())
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, code: &str) -> Result<Credentials, ExchangeError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.config.redirect_url.as_str());
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        debug!(token_url = %self.config.token_url, "Exchanging authorization code");
        self.post(form).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, ExchangeError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        debug!(token_url = %self.config.token_url, "Refreshing access token");
        self.post(form).await
    }
}

/// Condense a provider error body into `error: description`, falling back to
/// the (truncated) raw body.
fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        return match parsed.error_description {
            Some(description) => format!("{}: {}", parsed.error, description),
            None => parsed.error,
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no error details".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
