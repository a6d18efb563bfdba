// HTTP endpoints: OAuth callback and health

pub mod oauth;

pub use oauth::{create_oauth_router, OAuthAppState};

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Full router served by the binary.
pub fn create_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_oauth_router(state))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
