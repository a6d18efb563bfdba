//! OAuth 2.0 callback endpoints.
//!
//! Implements the browser side of the authorization code flow:
//! 1. A feature handler reports "not authenticated" with an authorization URL
//!    (or the user opens GET /oauth/start?tenant=...)
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to GET /oauth/callback?code=...&state=...
//! 4. State is verified, the code exchanged and the credentials stored
//! 5. The tenant's cached client is invalidated so the next call uses them

mod pages;


use crate::client::ClientInvalidator;
use crate::oauth::{AuthError, AuthManager};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callback failure, rendered as an HTML page.
#[derive(Debug)]
enum CallbackError {
    BadRequest {
        reason: &'static str,
        detail: Option<String>,
    },
    BadGateway(String),
    ServerError(String),
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let (status, html) = match self {
            CallbackError::BadRequest { reason, detail } => (
                StatusCode::BAD_REQUEST,
                pages::failure(reason, detail.as_deref()),
            ),
            CallbackError::BadGateway(detail) => (
                StatusCode::BAD_GATEWAY,
                pages::failure("The provider did not accept the authorization.", Some(&detail)),
            ),
            CallbackError::ServerError(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                pages::failure("The authorization could not be completed.", Some(&detail)),
            ),
        };
        (status, Html(html)).into_response()
    }
}

/// Shared state for the OAuth endpoints
#[derive(Clone)]
pub struct OAuthAppState {
    pub auth: Arc<AuthManager>,
    /// Cache to invalidate after a successful exchange. Without one, clients
    /// cached elsewhere keep their old credentials until rebuilt.
    pub invalidator: Option<Arc<dyn ClientInvalidator>>,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthStart {
    tenant: Option<String>,
}

/// Create OAuth router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/oauth/start", get(oauth_start))
        .route("/oauth/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /oauth/start?tenant=<id>
///
/// Redirects the browser to the provider's authorization page.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Query(query): Query<OAuthStart>,
) -> Result<Redirect, CallbackError> {
    let tenant = query
        .tenant
        .filter(|t| !t.is_empty())
        .ok_or(CallbackError::BadRequest {
            reason: "Missing 'tenant' parameter.",
            detail: None,
        })?;

    let auth_url = state.auth.auth_url(&tenant).map_err(|e| CallbackError::BadRequest {
        reason: "Cannot start authorization for this identifier.",
        detail: Some(e.to_string()),
    })?;

    info!(tenant = %tenant, "Redirecting to OAuth provider");
    Ok(Redirect::temporary(&auth_url))
}

/// GET /oauth/callback
///
/// Terminal on the first failure: provider error, missing code, missing
/// state, unverifiable state, failed exchange. Cache invalidation is best
/// effort and never fails the response.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Html<String>, CallbackError> {
    debug!("OAuth callback received");

    // A parameter present with an empty value counts as absent.
    let present = |value: Option<String>| value.filter(|v| !v.is_empty());

    if let Some(error) = present(callback.error) {
        let description = callback
            .error_description
            .unwrap_or_else(|| "no description".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(CallbackError::BadRequest {
            reason: "The provider reported an error.",
            detail: Some(format!("{}: {}", error, description)),
        });
    }

    let code = present(callback.code).ok_or(CallbackError::BadRequest {
        reason: "No authorization code was received.",
        detail: None,
    })?;
    let signed_state = present(callback.state).ok_or(CallbackError::BadRequest {
        reason: "Missing 'state' parameter.",
        detail: None,
    })?;

    let tenant = state
        .auth
        .verify_and_extract_tenant(&signed_state)
        .ok_or_else(|| {
            warn!("Invalid OAuth state (possible CSRF attempt)");
            CallbackError::BadRequest {
                reason: "Invalid or tampered authorization state.",
                detail: None,
            }
        })?;

    debug!(tenant = %tenant, "OAuth state verified");

    state
        .auth
        .exchange_code(&code, &tenant)
        .await
        .map_err(|e| match e {
            AuthError::Exchange(_) => CallbackError::BadGateway(e.to_string()),
            other => {
                error!(tenant = %tenant, error = %other, "OAuth callback failed");
                CallbackError::ServerError(other.to_string())
            }
        })?;

    match &state.invalidator {
        Some(invalidator) => invalidator.invalidate(&tenant).await,
        None => warn!(
            tenant = %tenant,
            "No client cache configured; cached clients keep previous credentials"
        ),
    }

    info!(tenant = %tenant, "OAuth flow completed successfully");
    Ok(Html(pages::success(&tenant)))
}
