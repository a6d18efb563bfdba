//! OAuth provider configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Endpoints and client registration for the identity provider.
///
/// Supplied externally at startup; this crate never owns it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Client ID registered with the provider
    pub client_id: String,

    /// Client secret registered with the provider
    pub client_secret: String,

    /// Callback URL the provider redirects back to
    pub redirect_url: String,

    /// Requested OAuth scopes
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    /// Google endpoints with the given client registration.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            scopes,
        }
    }

    /// Build the authorization URL for a signed `state`.
    ///
    /// Requests offline access (so a refresh token is issued) and forces the
    /// consent screen, so re-authorization always yields a fresh refresh token.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        let separator = if self.auth_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&access_type=offline&prompt=consent",
            self.auth_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}
