//! Request client integration tests
//!
//! Runs the full request pipeline against a wiremock server: envelope
//! unwrapping, pagination, retry bounds, unauthorized handling and
//! credential refresh.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, EncodingKey, Header};
use remedy_link::auth::SessionBackend;
use remedy_link::{
    AuthStatus, ClientConfig, ClientError, CredentialBackend, CredentialStore, ErrorKind,
    LoginRequest, Navigator, RequestClient, RouteTracker,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Helpers
// =============================================================================

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token_expiring_in(secs: u64, subject: &str) -> String {
    let claims = json!({ "sub": subject, "exp": now() + secs });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"server-only"),
    )
    .unwrap()
}

/// Session slot that counts how often it is cleared
#[derive(Default)]
struct CountingBackend {
    inner: SessionBackend,
    clears: AtomicUsize,
}

impl CredentialBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn read(&self) -> remedy_link::Result<Option<String>> {
        self.inner.read()
    }

    fn write(&self, token: &str) -> remedy_link::Result<()> {
        self.inner.write(token)
    }

    fn clear(&self) -> remedy_link::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

fn fast_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(format!("{}/api", server.uri()));
    config.max_retries = 2;
    config.retry_base_delay = Duration::from_millis(10);
    config.rate_limit_base_delay = Duration::from_millis(10);
    config.max_retry_delay = Duration::from_millis(50);
    config.timeout = Duration::from_secs(2);
    config
}

struct Harness {
    client: RequestClient,
    store: Arc<CredentialStore>,
    backend: Arc<CountingBackend>,
    routes: Arc<RouteTracker>,
}

fn harness(server: &MockServer, route: &str) -> Harness {
    let backend = Arc::new(CountingBackend::default());
    let store = Arc::new(CredentialStore::new(vec![
        Arc::clone(&backend) as Arc<dyn CredentialBackend>
    ]));
    let routes = Arc::new(RouteTracker::new(route));
    let client = RequestClient::new(
        fast_config(server),
        Arc::clone(&store),
        Arc::clone(&routes) as Arc<dyn Navigator>,
    )
    .unwrap();
    Harness {
        client,
        store,
        backend,
        routes,
    }
}

// =============================================================================
// Envelopes & Pagination
// =============================================================================

#[tokio::test]
async fn test_nested_data_envelopes_are_stripped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/incidents/7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "data": { "id": 7, "severity": "high" } } })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 3 })))
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    let incident: Value = h.client.get("/incidents/7").await.unwrap();
    assert_eq!(incident, json!({ "id": 7, "severity": "high" }));

    let site: Value = h.client.get("sites/3").await.unwrap();
    assert_eq!(site, json!({ "id": 3 }));
}

#[tokio::test]
async fn test_pagination_total_from_envelope_or_item_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/incidents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": 1 }, { "id": 2 }],
            "pagination": { "total": 42, "page": 1, "limit": 2 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": 1 }, { "id": 2 }, { "id": 3 }] })),
        )
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    let incidents = h.client.get_paginated::<Value>("/incidents").await.unwrap();
    assert_eq!(incidents.items.len(), 2);
    assert_eq!(incidents.total, 42);
    assert_eq!(incidents.limit, Some(2));

    let sites = h.client.get_paginated::<Value>("/sites").await.unwrap();
    assert_eq!(sites.total, 3);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn test_server_errors_retry_up_to_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/system/status"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "message": "overloaded" })))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    let err = h
        .client
        .get::<Value>("/system/status")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("overloaded"));
    server.verify().await;
}

#[tokio::test]
async fn test_rate_limit_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    let sites: Vec<Value> = h.client.get("/sites").await.unwrap();
    assert!(sites.is_empty());
    server.verify().await;
}

#[tokio::test]
async fn test_timeouts_are_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/incidents"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let mut h = harness(&server, "/");
    let mut config = fast_config(&server);
    config.timeout = Duration::from_millis(100);
    h.client = RequestClient::new(
        config,
        Arc::clone(&h.store),
        Arc::clone(&h.routes) as Arc<dyn Navigator>,
    )
    .unwrap();

    let err = h.client.get::<Value>("/incidents").await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout), "got {:?}", err);
    assert_eq!(err.kind(), ErrorKind::Transient);
    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_server_is_retried_then_surfaced() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = ClientConfig::new(format!("http://127.0.0.1:{}/api", port));
    config.max_retries = 2;
    config.retry_base_delay = Duration::from_millis(10);
    config.max_retry_delay = Duration::from_millis(50);
    let client = RequestClient::new(
        config,
        Arc::new(CredentialStore::in_memory()),
        Arc::new(RouteTracker::default()),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let err = client.get::<Value>("/incidents").await.unwrap_err();

    assert!(matches!(err, ClientError::Network(_)), "got {:?}", err);
    assert_eq!(err.kind(), ErrorKind::Transient);
    // Two backoff delays (10ms, 20ms) were waited out before giving up
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/incidents"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "title is required" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    let err = h
        .client
        .post::<Value, _>("/incidents", &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    server.verify().await;
}

// =============================================================================
// Unauthorized Handling
// =============================================================================

#[tokio::test]
async fn test_unauthorized_purges_once_and_redirects_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/incidents"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "token revoked" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/incidents?page=2");
    h.store.set(&token_expiring_in(3600, "operator-1")).unwrap();

    let err = h.client.get::<Value>("/incidents").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(h.backend.clears.load(Ordering::SeqCst), 1);
    assert!(h.store.get().is_none());
    assert_eq!(h.store.status(), AuthStatus::Anonymous);
    assert_eq!(h.routes.history(), vec!["/login".to_string()]);
    server.verify().await;
}

#[tokio::test]
async fn test_unauthorized_on_login_view_does_not_navigate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/incidents"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let h = harness(&server, "/login?next=/incidents");
    h.store.set(&token_expiring_in(3600, "operator-1")).unwrap();

    h.client.get::<Value>("/incidents").await.unwrap_err();
    assert!(h.routes.history().is_empty());
    assert!(h.store.get().is_none());
}

#[tokio::test]
async fn test_forbidden_keeps_credential() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/sites/9"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "admins only" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/sites/9");
    let token = token_expiring_in(3600, "operator-1");
    h.store.set(&token).unwrap();

    let err = h.client.delete::<Value>("/sites/9").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(h.store.get(), Some(token));
    assert_eq!(h.backend.clears.load(Ordering::SeqCst), 0);
    assert!(h.routes.history().is_empty());
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn test_credential_is_refreshed_before_expiry() {
    let server = MockServer::start().await;
    let stale = token_expiring_in(60, "operator-1");
    let fresh = token_expiring_in(3600, "operator-1");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(header("authorization", format!("Bearer {}", stale).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "token": fresh } })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/incidents/1"))
        .and(header("authorization", format!("Bearer {}", fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    h.store.set(&stale).unwrap();

    let incident: Value = h.client.get("/incidents/1").await.unwrap();
    assert_eq!(incident["id"], 1);
    assert_eq!(h.store.get(), Some(fresh));
    server.verify().await;
}

#[tokio::test]
async fn test_failed_refresh_lets_request_proceed() {
    let server = MockServer::start().await;
    let stale = token_expiring_in(60, "operator-1");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/incidents/1"))
        .and(header("authorization", format!("Bearer {}", stale).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    h.store.set(&stale).unwrap();

    let incident: Value = h.client.get("/incidents/1").await.unwrap();
    assert_eq!(incident["id"], 1);
    assert_eq!(h.store.get(), Some(stale));
}

#[tokio::test]
async fn test_login_installs_credential() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "operator-7");

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "ops@example.com", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": token, "user": { "id": 7, "role": "operator" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/login");
    let session = h
        .client
        .login(&LoginRequest {
            email: "ops@example.com".into(),
            password: "hunter2".into(),
        })
        .await
        .unwrap();

    assert_eq!(session.token, token);
    assert_eq!(session.user, Some(json!({ "id": 7, "role": "operator" })));
    assert!(session.expires_at.is_some());
    assert_eq!(h.store.get(), Some(token));
    assert_eq!(h.store.status(), AuthStatus::Authenticated);
}

#[tokio::test]
async fn test_bad_login_does_not_purge_or_navigate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid credentials" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/login");
    let err = h
        .client
        .login(&LoginRequest {
            email: "ops@example.com".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(h.backend.clears.load(Ordering::SeqCst), 0);
    assert!(h.routes.history().is_empty());
}

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, "/");
    h.store.set(&token_expiring_in(3600, "operator-1")).unwrap();

    h.client.logout().await.unwrap();
    assert!(h.store.get().is_none());
    assert_eq!(h.store.status(), AuthStatus::Anonymous);
    server.verify().await;
}

#[tokio::test]
async fn test_durable_credential_restores_across_stores() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("credential.json");
    let token = token_expiring_in(3600, "operator-1");

    let jar = Arc::new(reqwest::cookie::Jar::default());
    let base = url::Url::parse("http://localhost:8000/api/").unwrap();

    let first = CredentialStore::standard(&file, SessionBackend::new(), Arc::clone(&jar), base.clone());
    assert!(first.set(&token).unwrap());

    let second = CredentialStore::standard(
        &file,
        SessionBackend::new(),
        Arc::new(reqwest::cookie::Jar::default()),
        base,
    );
    assert_eq!(second.get(), Some(token));
}
