//! Request client behavior against a mock backend

use std::sync::{Arc, RwLock};
use std::time::Duration;

use portal_agent::api::{ApiBase, ApiClient, ApiError, AppStatus};
use portal_agent::session::{
    MemoryTokenStore, StatusNavigator, StoreError, TokenPair, TokenStore,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    client: ApiClient,
    tokens: Arc<MemoryTokenStore>,
    navigator: Arc<StatusNavigator>,
}

fn harness(server: &MockServer, pair: Option<TokenPair>) -> Harness {
    let tokens = Arc::new(match pair {
        Some(pair) => MemoryTokenStore::with_pair(pair),
        None => MemoryTokenStore::new(),
    });
    let navigator = Arc::new(StatusNavigator::new());
    let base = ApiBase::new("/api/v1", &server.uri()).unwrap();
    let client = ApiClient::new(base, tokens.clone(), navigator.clone()).unwrap();
    Harness {
        client,
        tokens,
        navigator,
    }
}

fn pair(access: &str, refresh: Option<&str>) -> Option<TokenPair> {
    Some(TokenPair::new(access, refresh.map(String::from)))
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_call_replayed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", Some("r1")));
    let data = h.client.get("tickets/").await.unwrap();

    assert_eq!(data, json!([{ "id": 1 }]));
    let stored = h.tokens.get().unwrap();
    assert_eq!(stored.access, "new");
    assert_eq!(stored.refresh.as_deref(), Some("r1"));
    assert!(h.navigator.pending().is_none());
}

#[tokio::test]
async fn rotated_refresh_token_replaces_the_stored_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "new", "refresh_token": "r2" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Ann" })))
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", Some("r1")));
    h.client.get("me").await.unwrap();

    let stored = h.tokens.get().unwrap();
    assert_eq!(stored.access, "new");
    assert_eq!(stored.refresh.as_deref(), Some("r2"));
}

#[tokio::test]
async fn rejected_refresh_ends_the_session_without_replay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "invalid" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", Some("bad")));
    let err = h.client.get("tickets/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert!(h.tokens.get().is_none());
    assert_eq!(h.navigator.pending().as_deref(), Some("/login"));
    assert!(!h.client.is_authenticated());
}

#[tokio::test]
async fn missing_refresh_token_skips_the_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "x" })))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", None));
    let err = h.client.get("me").await.unwrap_err();

    assert!(matches!(err, ApiError::AuthExpired));
    assert_eq!(h.navigator.pending().as_deref(), Some("/login"));
}

#[tokio::test]
async fn second_unauthorized_is_returned_without_another_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/admin/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", Some("r1")));
    let err = h.client.get("admin/").await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(!err.is_auth_expired());
    assert!(h.client.is_authenticated());
    assert!(h.navigator.pending().is_none());
}

#[tokio::test]
async fn empty_success_body_yields_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/tickets/5/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tickets/5/close/"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(&server, pair("a", Some("r")));
    assert_eq!(h.client.delete("tickets/5/").await.unwrap(), Value::Null);
    assert_eq!(h.client.post("tickets/5/close/", None).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn explicit_authorization_header_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer override"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, pair("stored", Some("r")));
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer override"));
    let data = h
        .client
        .call_with_headers(Method::GET, "me", None, headers)
        .await
        .unwrap();

    assert_eq!(data["ok"], true);
}

#[tokio::test]
async fn http_errors_carry_status_and_update_app_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/404/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stats/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness(&server, pair("a", Some("r")));

    match h.client.get("tickets/404/").await.unwrap_err() {
        ApiError::Http { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "not found");
        }
        other => panic!("Expected Http error, got {:?}", other),
    }
    assert_eq!(h.client.app_status(), AppStatus::Online);

    let err = h.client.get("stats/").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(h.client.app_status(), AppStatus::ServerError);
    assert_eq!(h.client.recent_errors().len(), 2);
}

#[tokio::test]
async fn unreachable_backend_reports_offline() {
    let tokens = Arc::new(MemoryTokenStore::new());
    let base = ApiBase::new("/api/v1", "http://127.0.0.1:9").unwrap();
    let client = ApiClient::new(base, tokens, Arc::new(StatusNavigator::new())).unwrap();

    let err = client.get("me").await.unwrap_err();

    assert!(matches!(err, ApiError::Network(_)));
    assert_eq!(client.app_status(), AppStatus::Offline);
}

#[tokio::test]
async fn login_stores_the_returned_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_json(json!({ "phone": "+70000000000", "password": "pw" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "a1", "refreshToken": "r1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, None);
    let pair = h.client.login("+70000000000", "pw").await.unwrap();

    assert_eq!(pair.access, "a1");
    let stored = h.tokens.get().unwrap();
    assert_eq!(stored.refresh.as_deref(), Some("r1"));
    assert!(h.client.is_authenticated());
}

#[tokio::test]
async fn prefixed_and_relative_paths_hit_the_same_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&server, pair("a", Some("r")));
    for input in ["tickets/", "/tickets/", "/api/v1/tickets/"] {
        assert_eq!(h.client.get(input).await.unwrap(), json!([]));
    }
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "new" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tickets/"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&server, pair("old", Some("r1")));
    let (a, b, c) = tokio::join!(
        h.client.get("tickets/"),
        h.client.get("tickets/"),
        h.client.get("tickets/"),
    );

    for result in [a, b, c] {
        assert_eq!(result.unwrap(), json!(1));
    }
    assert_eq!(h.tokens.get().unwrap().access, "new");
    assert!(h.navigator.pending().is_none());
}

/// Token store whose writes always fail
struct FailingWrites {
    pair: RwLock<Option<TokenPair>>,
}

impl TokenStore for FailingWrites {
    fn get(&self) -> Option<TokenPair> {
        self.pair.read().unwrap().clone()
    }

    fn set(&self, _pair: &TokenPair) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only state dir",
        )))
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.pair.write().unwrap() = None;
        Ok(())
    }
}

#[tokio::test]
async fn unstored_refresh_is_reported_and_not_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "new", "refresh_token": "r2" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/me"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tokens = Arc::new(FailingWrites {
        pair: RwLock::new(pair("old", Some("r1"))),
    });
    let navigator = Arc::new(StatusNavigator::new());
    let base = ApiBase::new("/api/v1", &server.uri()).unwrap();
    let client = ApiClient::new(base, tokens.clone(), navigator.clone()).unwrap();

    let err = client.get("me").await.unwrap_err();

    assert!(matches!(err, ApiError::Storage(_)));
    assert_eq!(tokens.get().unwrap().access, "old");
    assert!(navigator.pending().is_none());
}

#[tokio::test]
async fn login_accepts_several_token_spellings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "token": "a1",
            "accessToken": "a1",
            "refresh_token": "r1",
            "refreshToken": "r1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, None);
    let pair = h.client.login("+70000000000", "pw").await.unwrap();

    assert_eq!(pair, TokenPair::new("a1", Some("r1".to_string())));
    assert_eq!(h.tokens.get(), Some(pair));
}
