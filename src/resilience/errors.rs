//! Remote error taxonomy.

use crate::credentials::StoreError;
use crate::oauth::AuthError;
use crate::token::TokenError;
use reqwest::StatusCode;
use serde::Deserialize;

const MAX_MESSAGE_LEN: usize = 512;

/// A non-2xx answer from the remote API, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote API returned {status}: {message}")]
pub struct RemoteError {
    pub status: StatusCode,
    pub message: String,
}

/// Google-style API error envelope: `{"error": {"code": 404, "message": "..."}}`
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl RemoteError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Consumes an error response, keeping the provider's own message.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_body(status, &body)
    }

    pub fn from_body(status: StatusCode, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => envelope.error.message,
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("no error details")
                .to_string(),
            Err(_) => body.trim().chars().take(MAX_MESSAGE_LEN).collect(),
        };
        Self { status, message }
    }
}

/// Errors surfaced to feature handlers. Remote failures are already
/// classified; handlers never look at raw status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No stored credential for the tenant.
    #[error("{tenant} is not authenticated; authorize at {auth_url}")]
    NotAuthenticated { tenant: String, auth_url: String },

    /// 401: the grant was revoked or the token rejected.
    #[error("authorization expired or was revoked: {message}")]
    AuthExpired { message: String },

    /// 403: valid grant, insufficient scope.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    /// 429: retried with backoff before surfacing.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// 500, 502, 503, 504
    #[error("remote server error {status}: {message}")]
    ServerError { status: StatusCode, message: String },

    /// Any other non-2xx status.
    #[error("remote API returned {status}: {message}")]
    Remote { status: StatusCode, message: String },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request to remote API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("operation cancelled")]
    Cancelled,

    /// Anything that did not come from the remote API, unchanged.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Only rate limiting is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// True when the remedy is sending the user through authorization again.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            ApiError::NotAuthenticated { .. }
                | ApiError::AuthExpired { .. }
                | ApiError::PermissionDenied { .. }
                | ApiError::Token(_)
        ) || matches!(self, ApiError::Store(e) if e.is_not_authenticated())
    }
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        classify(err)
    }
}

/// Maps a remote status onto the taxonomy.
pub fn classify(err: RemoteError) -> ApiError {
    let RemoteError { status, message } = err;
    match status {
        StatusCode::UNAUTHORIZED => ApiError::AuthExpired { message },
        StatusCode::FORBIDDEN => ApiError::PermissionDenied { message },
        StatusCode::NOT_FOUND => ApiError::NotFound { message },
        StatusCode::CONFLICT => ApiError::Conflict { message },
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { message },
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ApiError::ServerError { status, message },
        _ => ApiError::Remote { status, message },
    }
}

/// Classifies `err` if it wraps a [`RemoteError`]; anything else passes
/// through as [`ApiError::Other`].
pub fn classify_error(err: anyhow::Error) -> ApiError {
    match err.downcast::<RemoteError>() {
        Ok(remote) => classify(remote),
        Err(other) => ApiError::Other(other),
    }
}

/// Human-readable explanation with a next step.
///
/// `auth_url` is offered for errors that re-authorization fixes; a
/// `NotAuthenticated` error carries its own.
pub fn describe(err: &ApiError, auth_url: Option<&str>) -> String {
    let reauth = |lead: &str| match auth_url {
        Some(url) => format!("{} Re-authorize at: {}", lead, url),
        None => format!("{} Re-authorize to continue.", lead),
    };

    match err {
        ApiError::NotAuthenticated { tenant, auth_url } => format!(
            "{} has not authorized access yet. Authorize at: {}",
            tenant, auth_url
        ),
        ApiError::AuthExpired { message } => {
            reauth(&format!("Authorization expired or was revoked ({}).", message))
        }
        ApiError::Token(e) => reauth(&format!("Could not obtain a valid access token ({}).", e)),
        ApiError::PermissionDenied { message } => reauth(&format!(
            "Permission denied ({}). The granted scopes do not cover this operation.",
            message
        )),
        ApiError::NotFound { message } => format!("The requested resource was not found: {}", message),
        ApiError::Conflict { message } => {
            format!("The request conflicts with the current state of the resource: {}", message)
        }
        ApiError::RateLimited { message } => format!(
            "The remote API is rate limiting requests and retries were exhausted: {}. Try again later.",
            message
        ),
        ApiError::ServerError { status, message } => format!(
            "The remote API had a temporary problem ({}): {}. Try again shortly.",
            status.as_u16(),
            message
        ),
        ApiError::Store(e) if e.is_not_authenticated() => reauth("No stored authorization."),
        other => other.to_string(),
    }
}
