use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use usergate::api::{create_router, OAuthAppState};
use usergate::client::{ClientCache, ClientInvalidator};
use usergate::config::{load_config, UsergateConfig};
use usergate::oauth::AuthManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "usergate=info".into()),
        )
        .init();

    info!("usergate starting...");

    // Config path: first argument, then USERGATE_CONFIG, else defaults + env
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("USERGATE_CONFIG").ok());
    let mut config = match &config_path {
        Some(path) => load_config(path)?,
        None => UsergateConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    info!(config_file = ?config_path, "Configuration loaded");

    let store = config.open_store()?;
    let signer = config.signer()?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let auth = Arc::new(AuthManager::with_http_endpoint(
        config.provider(),
        signer,
        store,
        http.clone(),
    ));
    let cache = Arc::new(ClientCache::new(
        Arc::clone(&auth),
        config.client_options(http),
    ));
    info!(redirect_url = %config.oauth.redirect_url, "Authorization manager initialized");

    let invalidator: Arc<dyn ClientInvalidator> = cache;
    let router = create_router(OAuthAppState {
        auth,
        invalidator: Some(invalidator),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Callback server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Callback server error")?;

    info!("usergate stopped");
    Ok(())
}
