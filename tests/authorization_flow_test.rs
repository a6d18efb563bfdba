// Integration tests for the full authorization flow: not authenticated →
// authorization URL → callback → cached client, against a mock provider.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use usergate::api::{create_router, OAuthAppState};
use usergate::client::{ClientCache, ClientInvalidator, ClientOptions};
use usergate::credentials::{CredentialStore, Credentials, FileCredentialStore};
use usergate::oauth::{AuthManager, ProviderConfig, StateSigner};
use usergate::{describe, ApiError, RetryPolicy};

const TENANT: &str = "user@example.com";

struct TestApp {
    router: Router,
    cache: Arc<ClientCache>,
    store: Arc<dyn CredentialStore>,
    server: ServerGuard,
    _dir: tempfile::TempDir,
}

async fn create_test_app() -> TestApp {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::open(dir.path().join("credentials"), None).unwrap());

    let provider = ProviderConfig {
        auth_url: format!("{}/authorize", server.url()),
        token_url: format!("{}/token", server.url()),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_url: "http://localhost:8080/oauth/callback".to_string(),
        scopes: vec!["openid".to_string(), "email".to_string()],
    };
    let auth = Arc::new(AuthManager::with_http_endpoint(
        provider,
        StateSigner::new(b"integration-test-key").unwrap(),
        Arc::clone(&store),
        reqwest::Client::new(),
    ));

    let options = ClientOptions {
        base_url: format!("{}/api", server.url()),
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::from_millis(1),
        },
        http: reqwest::Client::new(),
    };
    let cache = Arc::new(ClientCache::new(Arc::clone(&auth), options));
    let invalidator: Arc<dyn ClientInvalidator> = cache.clone();
    let router = create_router(OAuthAppState {
        auth,
        invalidator: Some(invalidator),
    });

    TestApp {
        router,
        cache,
        store,
        server,
        _dir: dir,
    }
}

async fn mock_code_exchange(server: &mut ServerGuard, code: &str, access_token: &str) -> Mock {
    server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), code.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"access_token":"{}","refresh_token":"refresh-1","expires_in":3600,"token_type":"Bearer"}}"#,
            access_token
        ))
        .create_async()
        .await
}

fn state_from(auth_url: &str) -> String {
    let (_, query) = auth_url.split_once('?').unwrap();
    let params: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap();
    params
        .into_iter()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v)
        .unwrap()
}

async fn callback(router: &Router, code: &str, state: &str) -> StatusCode {
    let query = serde_urlencoded::to_string([("code", code), ("state", state)]).unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/oauth/callback?{}", query))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

async fn not_authenticated_url(cache: &ClientCache) -> String {
    match cache.client_for(TENANT).await {
        Err(ApiError::NotAuthenticated { auth_url, .. }) => auth_url,
        other => panic!("expected NotAuthenticated, got {:?}", other.map(|_| ())),
    }
}

/// Unauthenticated tenant → authorize → callback → client works.
#[tokio::test]
async fn test_end_to_end_authorization() {
    let mut app = create_test_app().await;

    let err = app.cache.client_for(TENANT).await.unwrap_err();
    assert!(err.needs_reauth());
    assert!(describe(&err, None).contains("Authorize at:"));

    let auth_url = not_authenticated_url(&app.cache).await;
    assert!(auth_url.contains("access_type=offline"));
    assert!(auth_url.contains("prompt=consent"));

    let state = state_from(&auth_url);
    let (tenant, mac) = state.split_once(':').unwrap();
    assert_eq!(tenant, TENANT);
    assert_eq!(mac.len(), 64);
    assert!(mac.chars().all(|c| c.is_ascii_hexdigit()));

    let exchange = mock_code_exchange(&mut app.server, "code-1", "access-1").await;
    assert_eq!(callback(&app.router, "code-1", &state).await, StatusCode::OK);
    exchange.assert_async().await;

    let stored = app.store.load(TENANT).unwrap();
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));

    let api = app
        .server
        .mock("GET", "/api/userinfo")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"email":"user@example.com"}"#)
        .create_async()
        .await;

    let client = app.cache.client_for(TENANT).await.unwrap();
    let info: Value = client
        .get_json("userinfo", &CancellationToken::new())
        .await
        .unwrap();
    api.assert_async().await;
    assert_eq!(info["email"], "user@example.com");
}

/// A tampered state never reaches the token endpoint.
#[tokio::test]
async fn test_tampered_state_is_rejected() {
    let mut app = create_test_app().await;
    let state = state_from(&not_authenticated_url(&app.cache).await);

    let exchange = app
        .server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let forged = format!("attacker@example.com:{}", state.split_once(':').unwrap().1);
    assert_eq!(
        callback(&app.router, "code-1", &forged).await,
        StatusCode::BAD_REQUEST
    );

    exchange.assert_async().await;
    assert!(app.store.load("attacker@example.com").is_err());
}

/// Re-authorization replaces the cached client.
#[tokio::test]
async fn test_reauthorization_invalidates_cached_client() {
    let mut app = create_test_app().await;
    let state = state_from(&not_authenticated_url(&app.cache).await);

    let _first_grant = mock_code_exchange(&mut app.server, "code-1", "access-1").await;
    assert_eq!(callback(&app.router, "code-1", &state).await, StatusCode::OK);
    let first = app.cache.client_for(TENANT).await.unwrap();
    assert_eq!(first.token().await.unwrap().access_token, "access-1");

    let _second_grant = mock_code_exchange(&mut app.server, "code-2", "access-2").await;
    assert_eq!(callback(&app.router, "code-2", &state).await, StatusCode::OK);
    assert!(!app.cache.is_cached(TENANT).await);

    let second = app.cache.client_for(TENANT).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.token().await.unwrap().access_token, "access-2");
}

/// An expiring token is refreshed through the provider and written back once.
#[tokio::test]
async fn test_refreshed_token_is_persisted() {
    let mut app = create_test_app().await;
    app.store
        .save(
            TENANT,
            &Credentials {
                access_token: "stale".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                token_type: "Bearer".to_string(),
                expires_at: Some(Utc::now() + Duration::seconds(10)),
            },
        )
        .unwrap();

    let refresh = app
        .server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"renewed","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;
    let api = app
        .server
        .mock("GET", "/api/files")
        .match_header("authorization", "Bearer renewed")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let client = app.cache.client_for(TENANT).await.unwrap();
    let cancel = CancellationToken::new();
    let _: Value = client.get_json("files", &cancel).await.unwrap();
    let _: Value = client.get_json("files", &cancel).await.unwrap();

    refresh.assert_async().await;
    api.assert_async().await;

    let stored = app.store.load(TENANT).unwrap();
    assert_eq!(stored.access_token, "renewed");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
}

/// A revoked grant surfaces as a re-authorization error with the URL.
#[tokio::test]
async fn test_revoked_grant_needs_reauth() {
    let mut app = create_test_app().await;
    app.store
        .save(
            TENANT,
            &Credentials {
                access_token: "revoked".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                token_type: "Bearer".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
        )
        .unwrap();

    let _api = app
        .server
        .mock("GET", "/api/files")
        .with_status(401)
        .with_body(r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#)
        .create_async()
        .await;

    let client = app.cache.client_for(TENANT).await.unwrap();
    let err = client
        .get_json::<Value>("files", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::AuthExpired { .. }));
    let message = describe(&err, Some("https://example.com/authorize"));
    assert!(message.contains("Invalid Credentials"));
    assert!(message.contains("https://example.com/authorize"));
}
