//! Portal API Client
//!
//! The one path from application code to the backend. Attaches the bearer
//! token, recovers from an expired access token with a single refresh and a
//! single replay of the original call, and ends the session when that fails.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::base::ApiBase;
use super::errors::ApiError;
use super::types::{
    AppStatus, ErrorEntry, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse,
};
use crate::session::{Navigator, TokenPair, TokenStore, LOGIN_PATH};

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Refresh endpoint, relative to the API base
const REFRESH_ENDPOINT: &str = "auth/refresh";

/// Login endpoint, relative to the API base
const LOGIN_ENDPOINT: &str = "auth/login";

/// Which send of a call this is. A call is sent at most twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retried,
}

/// Authenticated client for the portal backend
#[derive(Clone)]
pub struct ApiClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base every relative path resolves against
    base: ApiBase,
    /// Token pair storage (sole owner of token state)
    tokens: Arc<dyn TokenStore>,
    /// Receives the login redirect when the session ends
    navigator: Arc<dyn Navigator>,
    /// Serializes refreshes so concurrent 401s share one refresh
    refresh_gate: Arc<Mutex<()>>,
    /// Connectivity as last observed (see `AppStatus`)
    status: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

impl ApiClient {
    /// Create a client for `base` using the given token store and navigator
    pub fn new(
        base: ApiBase,
        tokens: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base,
            tokens,
            navigator,
            refresh_gate: Arc::new(Mutex::new(())),
            status: Arc::new(AtomicU8::new(AppStatus::Online.as_u8())),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    /// Issue `method path` with an optional JSON body.
    ///
    /// Returns the parsed JSON body, or `Value::Null` for an empty successful body.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        self.call_with_headers(method, path, body, HeaderMap::new())
            .await
    }

    /// Like [`call`](Self::call), with explicit headers that take precedence
    /// over the defaults (including `Authorization`)
    pub async fn call_with_headers(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> Result<Value, ApiError> {
        let result = match self.base.resolve(path) {
            Ok(url) => self.execute(&method, &url, body, &headers).await,
            Err(e) => Err(e),
        };
        self.record_outcome(&method, path, &result);
        result
    }

    /// Call and decode the JSON body into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let value = self.call(method, path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, path, None).await
    }

    /// POST, sending `{}` when no body is given
    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let empty = Value::Object(Default::default());
        self.call(Method::POST, path, Some(body.unwrap_or(&empty)))
            .await
    }

    /// PUT, sending `{}` when no body is given
    pub async fn put(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let empty = Value::Object(Default::default());
        self.call(Method::PUT, path, Some(body.unwrap_or(&empty)))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::DELETE, path, None).await
    }

    /// Authenticate with phone and password and store the returned tokens
    pub async fn login(&self, phone: &str, password: &str) -> Result<TokenPair, ApiError> {
        let result = self.login_inner(phone, password).await;
        self.record_outcome(&Method::POST, LOGIN_ENDPOINT, &result);
        result
    }

    async fn login_inner(&self, phone: &str, password: &str) -> Result<TokenPair, ApiError> {
        let url = self.base.resolve(LOGIN_ENDPOINT)?;
        info!(url = %url, "Logging in");

        let response = self
            .http_client
            .post(url)
            .json(&LoginRequest { phone, password })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let login: LoginResponse = response.json().await?;
        let pair = login
            .into_pair()
            .ok_or_else(|| ApiError::Decode("no access token in login response".to_string()))?;
        self.set_tokens(&pair)?;

        info!(has_refresh = pair.refresh.is_some(), "Logged in");
        Ok(pair)
    }

    /// Store a pair obtained outside the client (e.g. registration)
    pub fn set_tokens(&self, pair: &TokenPair) -> Result<(), ApiError> {
        self.tokens
            .set(pair)
            .map_err(|e| ApiError::Storage(e.to_string()))
    }

    /// End the session and send the client to the login entry point
    pub fn logout(&self) {
        info!("Logging out");
        self.end_session();
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.get().is_some()
    }

    pub fn base(&self) -> &ApiBase {
        &self.base
    }

    /// Get connectivity as last observed
    pub fn app_status(&self) -> AppStatus {
        AppStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    /// Get recent errors
    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log.read().unwrap().iter().cloned().collect()
    }

    /// Send, and on a first 401 refresh once and replay once
    async fn execute(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        headers: &HeaderMap,
    ) -> Result<Value, ApiError> {
        let sent_token = self.tokens.get().map(|p| p.access);
        let response = self
            .send(method, url, body, headers, sent_token.as_deref(), Attempt::First)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return parse_body(response).await;
        }

        warn!(method = %method, url = %url, "Access token rejected, refreshing");
        let Some(new_token) = self.refresh(sent_token.as_deref()).await? else {
            self.end_session();
            return Err(ApiError::AuthExpired);
        };

        let retried = self
            .send(method, url, body, headers, Some(&new_token), Attempt::Retried)
            .await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %method, url = %url, "Still unauthorized after refresh, giving up");
        }
        parse_body(retried).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        headers: &HeaderMap,
        token: Option<&str>,
        attempt: Attempt,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                request_headers.insert(AUTHORIZATION, value);
            }
        }
        for (name, value) in headers {
            request_headers.insert(name.clone(), value.clone());
        }

        let mut request = self
            .http_client
            .request(method.clone(), url.clone())
            .headers(request_headers);
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        debug!(method = %method, url = %url, attempt = ?attempt, "Sending API request");
        let response = request.send().await?;
        debug!(status = response.status().as_u16(), attempt = ?attempt, "API response");
        Ok(response)
    }

    /// Obtain a fresh access token after `rejected` was refused.
    ///
    /// Returns `None` when the session cannot be recovered, and an error when
    /// the refreshed pair could not be stored (the call is not replayed).
    async fn refresh(&self, rejected: Option<&str>) -> Result<Option<String>, ApiError> {
        let _guard = self.refresh_gate.lock().await;

        let current = self.tokens.get();
        if let Some(pair) = &current {
            if rejected != Some(pair.access.as_str()) {
                debug!("Token already replaced by a concurrent refresh");
                return Ok(Some(pair.access.clone()));
            }
        }

        let Some(refresh_token) = current.and_then(|p| p.refresh) else {
            info!("No refresh token available");
            return Ok(None);
        };

        match self.request_refresh(&refresh_token).await {
            Ok(pair) => {
                if let Err(e) = self.tokens.set(&pair) {
                    warn!(error = %e, "Failed to persist refreshed tokens");
                    return Err(ApiError::Storage(e.to_string()));
                }
                info!(rotated = pair.refresh.as_deref() != Some(refresh_token.as_str()), "Access token refreshed");
                Ok(Some(pair.access))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Ok(None)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let url = self.base.resolve(REFRESH_ENDPOINT)?;

        let response = self
            .http_client
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let refreshed: RefreshResponse = response.json().await?;
        refreshed
            .into_pair(Some(refresh_token.to_string()))
            .ok_or_else(|| ApiError::Decode("refresh response missing access_token".to_string()))
    }

    fn end_session(&self) {
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.navigator.navigate(LOGIN_PATH);
        info!("Session terminated");
    }

    /// Update connectivity status and the error log from a call result
    fn record_outcome<T>(&self, method: &Method, path: &str, result: &Result<T, ApiError>) {
        let status = match result {
            Ok(_) => AppStatus::Online,
            Err(ApiError::Network(_)) => AppStatus::Offline,
            Err(e) if e.is_server_side() => AppStatus::ServerError,
            Err(_) => AppStatus::Online,
        };
        self.status.store(status.as_u8(), Ordering::Relaxed);

        if let Err(e) = result {
            self.log_error(method, path, &e.to_string());
        }
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, method: &Method, path: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            method: method.to_string(),
            path: path.to_string(),
            error: error.to_string(),
        };

        let mut log = self.error_log.write().unwrap();
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }
}

/// Turn a response into the call result
async fn parse_body(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}
