//! Authenticated HTTP client for the Life Changing Journey API
//!
//! Wraps a [`Transport`] with bearer-token injection, single-flight token
//! refresh on 401 and exactly one retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;
use serde_json::Value;
use tokio::time::Instant;

use super::metrics::PerformanceRecorder;
use super::result::{ApiError, ApiResponse, ApiResult, Body};
use super::routes::RouteTable;
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::tokens::{FileStorage, TokenStore};
use crate::auth::{CliRedirect, LoginRedirect};
use crate::config::Config;

const UNAUTHORIZED: u16 = 401;

/// One logical API call, before routing and authentication
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Send without credentials and never refresh (login, public pages)
    pub anonymous: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            anonymous: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Request interceptor. Build one per process and share it.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<TokenStore>,
    refresher: RefreshCoordinator,
    recorder: PerformanceRecorder,
    routes: RouteTable,
    redirect: Arc<dyn LoginRedirect>,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<TokenStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Self {
        let base_url = config.api_base_url.trim_end_matches('/').to_string();
        let refresher = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            join_url(&base_url, &config.refresh_path),
            config.timeout(),
        );

        Self {
            transport,
            store,
            refresher,
            recorder: PerformanceRecorder::new(config.history_size),
            routes: RouteTable::new(config.routes.clone()),
            redirect,
            base_url,
            timeout: config.timeout(),
        }
    }

    /// Client over reqwest with the session persisted in the config directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let session_path = Config::session_path().context("Could not locate session file")?;
        let store = TokenStore::load(
            Box::new(FileStorage::new(session_path)),
            config.session_flag_ttl(),
        );

        Ok(Self::new(
            config,
            Arc::new(ReqwestTransport::new()),
            Arc::new(store),
            Arc::new(CliRedirect),
        ))
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn recorder(&self) -> &PerformanceRecorder {
        &self.recorder
    }

    pub async fn get(&self, path: &str) -> ApiResult {
        self.send(ApiRequest::get(path)).await
    }

    /// Execute one logical request.
    ///
    /// Order is fixed: read token, dispatch, then on 401 refresh and retry
    /// once. An unrecoverable 401 clears the session and redirects to login.
    pub async fn send(&self, request: ApiRequest) -> ApiResult {
        let path = self.routes.rewrite(&request.path).into_owned();

        let credentials = if request.anonymous {
            None
        } else {
            self.store.get()
        };
        let used_token = credentials.map(|c| c.access_token);

        let resp = self.dispatch(&request, &path, used_token.as_deref()).await?;

        match used_token {
            Some(stale) if resp.status == UNAUTHORIZED => {
                tracing::info!("401 for {}, attempting token refresh", path);
                self.recover(&request, &path, &stale).await
            }
            _ => into_result(resp),
        }
    }

    async fn recover(&self, request: &ApiRequest, path: &str, stale: &str) -> ApiResult {
        if !self.refresher.ensure_fresh_token_after(stale).await {
            return Err(self.end_session());
        }
        let Some(fresh) = self.store.get() else {
            return Err(self.end_session());
        };

        let retry = self
            .dispatch(request, path, Some(fresh.access_token.as_str()))
            .await?;
        if retry.status == UNAUTHORIZED {
            tracing::warn!("Refreshed token rejected for {}", path);
            return Err(self.end_session());
        }
        into_result(retry)
    }

    /// Tear down the session. Only the caller that actually removed the
    /// credentials triggers the redirect.
    fn end_session(&self) -> ApiError {
        if self.store.clear() {
            tracing::warn!("Session expired, credentials cleared");
            self.redirect.redirect_to_login();
        }
        ApiError::AuthenticationFailed
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        path: &str,
        token: Option<&str>,
    ) -> Result<HttpResponse, ApiError> {
        let mut headers = request.headers.clone();
        if let Some(token) = token {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        let http_request = HttpRequest {
            method: request.method.clone(),
            url: join_url(&self.base_url, path),
            headers,
            body: request.body.clone(),
        };

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.timeout, self.transport.execute(http_request)).await;
        self.recorder.record(path, started.elapsed());

        match outcome {
            Ok(Ok(resp)) => {
                tracing::debug!("{} {} -> {}", request.method, path, resp.status);
                Ok(resp)
            }
            Ok(Err(e)) => {
                tracing::warn!("{} {} failed: {}", request.method, path, e);
                Err(ApiError::Network(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("{} {} timed out", request.method, path);
                Err(ApiError::Timeout(self.timeout))
            }
        }
    }
}

fn into_result(resp: HttpResponse) -> ApiResult {
    let status = resp.status;
    let body = Body::parse(&resp.body);
    if resp.is_success() {
        Ok(ApiResponse { status, body })
    } else {
        Err(ApiError::Http { status, body })
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{CountingRedirect, MockTransport};
    use crate::api::result::ApiOutcome;
    use crate::api::routes::RouteRule;
    use crate::api::transport::TransportError;
    use crate::auth::tokens::{CredentialPair, MemoryStorage};
    use serde_json::json;

    const BASE: &str = "http://api.test";

    struct Harness {
        client: ApiClient,
        transport: Arc<MockTransport>,
        redirect: Arc<CountingRedirect>,
    }

    fn test_config() -> Config {
        Config {
            api_base_url: BASE.to_string(),
            timeout_secs: 5,
            ..Config::default()
        }
    }

    fn harness_with(
        config: Config,
        transport: MockTransport,
        pair: Option<CredentialPair>,
    ) -> Harness {
        let storage = match pair {
            Some(pair) => MemoryStorage::with_credentials(pair),
            None => MemoryStorage::default(),
        };
        let store = Arc::new(TokenStore::load(
            Box::new(storage),
            Duration::from_secs(3600),
        ));
        let transport = Arc::new(transport);
        let redirect = Arc::new(CountingRedirect::default());
        let client = ApiClient::new(&config, transport.clone(), store, redirect.clone());
        Harness {
            client,
            transport,
            redirect,
        }
    }

    fn harness(transport: MockTransport, pair: Option<CredentialPair>) -> Harness {
        harness_with(test_config(), transport, pair)
    }

    fn a1() -> Option<CredentialPair> {
        Some(CredentialPair::new("A1", "R1"))
    }

    /// Backend where only `A2` is accepted and refresh issues A2/R2.
    fn rotating_backend(refresh_status: u16) -> MockTransport {
        MockTransport::new(move |req| {
            if req.url.ends_with("/auth/refresh") {
                return Ok(if refresh_status == 200 {
                    HttpResponse::new(200, r#"{"access_token":"A2","refresh_token":"R2"}"#)
                } else {
                    HttpResponse::new(refresh_status, r#"{"detail":"invalid refresh token"}"#)
                });
            }
            match req.header("authorization") {
                Some("Bearer A2") => Ok(HttpResponse::new(200, r#"{"tests":["mbti","riasec"]}"#)),
                _ => Ok(HttpResponse::new(401, r#"{"detail":"token expired"}"#)),
            }
        })
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_and_retried() {
        let h = harness(rotating_backend(200), a1());

        let resp = h.client.get("/tests").await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, Body::Json(json!({"tests": ["mbti", "riasec"]})));

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].header("authorization"), Some("Bearer A1"));
        assert!(calls[1].url.ends_with("/auth/refresh"));
        assert_eq!(calls[2].header("authorization"), Some("Bearer A2"));

        assert_eq!(
            h.client.store().get(),
            Some(CredentialPair::new("A2", "R2"))
        );
        assert_eq!(h.redirect.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_ends_session() {
        let h = harness(rotating_backend(401), a1());

        let err = h.client.get("/tests").await.unwrap_err();
        assert!(matches!(err, ApiError::AuthenticationFailed));
        assert_eq!(err.status(), Some(401));

        assert!(h.client.store().get().is_none());
        assert!(!h.client.store().is_logged_in());
        assert_eq!(h.redirect.count(), 1);
        assert_eq!(h.transport.count("/tests"), 1);
    }

    #[tokio::test]
    async fn test_valid_token_needs_no_refresh() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(200, r#"{"ok":true}"#)))
            .with_delay(Duration::from_millis(10));
        let h = harness(transport, a1());

        let (a, b, c) = tokio::join!(
            h.client.get("/tests"),
            h.client.get("/results/1"),
            h.client.get("/contacts")
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        assert_eq!(h.transport.calls().len(), 3);
        assert_eq!(h.transport.count("/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let h = harness(
            rotating_backend(200).with_delay(Duration::from_millis(10)),
            a1(),
        );

        let results = futures::future::join_all(
            (0..5).map(|i| h.client.send(ApiRequest::get(format!("/results/{}", i)))),
        )
        .await;
        assert!(results.iter().all(|r| r.is_ok()));

        assert_eq!(h.transport.count("/auth/refresh"), 1);
        let retries: Vec<_> = h
            .transport
            .calls()
            .into_iter()
            .filter(|c| c.header("authorization") == Some("Bearer A2"))
            .collect();
        assert_eq!(retries.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_401s_with_failed_refresh_redirect_once() {
        let h = harness(
            rotating_backend(401).with_delay(Duration::from_millis(10)),
            a1(),
        );

        let results = futures::future::join_all(
            (0..4).map(|i| h.client.send(ApiRequest::get(format!("/results/{}", i)))),
        )
        .await;

        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ApiError::AuthenticationFailed))));
        assert_eq!(h.transport.count("/auth/refresh"), 1);
        assert_eq!(h.redirect.count(), 1);
        assert!(h.client.store().get().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_request_does_not_break_next_one() {
        let h = harness(
            rotating_backend(200).with_delay_for(|req| {
                if req.url.ends_with("/auth/refresh") {
                    Duration::from_millis(100)
                } else {
                    Duration::ZERO
                }
            }),
            a1(),
        );

        // Caller gives up while the refresh is still running
        let abandoned =
            tokio::time::timeout(Duration::from_millis(30), h.client.get("/tests")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let resp = h.client.get("/tests").await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(h.transport.count("/auth/refresh"), 1);
        assert_eq!(h.redirect.count(), 0);
        assert_eq!(
            h.client.store().get(),
            Some(CredentialPair::new("A2", "R2"))
        );
    }

    #[tokio::test]
    async fn test_second_401_is_not_retried_again() {
        let transport = MockTransport::new(|req| {
            if req.url.ends_with("/auth/refresh") {
                Ok(HttpResponse::new(
                    200,
                    r#"{"access_token":"A2","refresh_token":"R2"}"#,
                ))
            } else {
                Ok(HttpResponse::new(401, "Unauthorized"))
            }
        });
        let h = harness(transport, a1());

        let err = h.client.get("/admin/contacts").await.unwrap_err();
        assert!(matches!(err, ApiError::AuthenticationFailed));
        assert_eq!(h.transport.count("/admin/contacts"), 2);
        assert_eq!(h.transport.count("/auth/refresh"), 1);
        assert!(h.client.store().get().is_none());
        assert_eq!(h.redirect.count(), 1);
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let transport =
            MockTransport::new(|_| Ok(HttpResponse::new(500, "Internal Server Error")));
        let h = harness(transport, a1());

        let outcome = ApiOutcome::from(h.client.get("/tests").await);
        assert_eq!(
            outcome,
            ApiOutcome {
                success: false,
                data: Some(json!("Internal Server Error")),
                error: Some("Internal Server Error".to_string()),
                status: Some(500),
            }
        );
    }

    #[tokio::test]
    async fn test_plain_text_success_body() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(200, "pong")));
        let h = harness(transport, None);

        let outcome = ApiOutcome::from(h.client.get("/health").await);
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(json!("pong")));
    }

    #[tokio::test]
    async fn test_client_error_skips_refresh() {
        let transport = MockTransport::new(|_| {
            Ok(HttpResponse::new(422, r#"{"message":"email is required"}"#))
        });
        let h = harness(transport, a1());

        let err = h
            .client
            .send(ApiRequest::post("/contacts").json(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), "HTTP 422: email is required");
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_401_without_token_is_plain_error() {
        let h = harness(rotating_backend(200), None);

        let err = h.client.get("/tests").await.unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 401, .. }));
        assert_eq!(h.transport.count("/auth/refresh"), 0);
        assert_eq!(h.redirect.count(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_request_sends_no_token() {
        let transport = MockTransport::new(|req| {
            assert_eq!(req.header("authorization"), None);
            Ok(HttpResponse::new(401, r#"{"detail":"bad credentials"}"#))
        });
        let h = harness(transport, a1());

        let err = h
            .client
            .send(ApiRequest::post("/auth/login").json(json!({})).anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(h.transport.calls().len(), 1);
        assert!(h.client.store().get().is_some());
    }

    #[tokio::test]
    async fn test_network_failure_is_a_value() {
        let transport =
            MockTransport::new(|_| Err(TransportError::Connect("connection refused".to_string())));
        let h = harness(transport, a1());

        let result = h.client.get("/tests").await;
        assert!(matches!(result, Err(ApiError::Network(_))));
        assert_eq!(h.client.recorder().stats("/tests").map(|s| s.count), Some(1));
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(200, "{}")))
            .with_delay(Duration::from_secs(10));
        let h = harness(transport, a1());

        let mut client = h.client;
        client.timeout = Duration::from_millis(20);

        let err = client.get("/tests").await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_routes_and_headers_applied() {
        let transport = MockTransport::new(|_| Ok(HttpResponse::new(204, "")));
        let config = Config {
            routes: vec![RouteRule {
                from: "/tests".to_string(),
                to: "/optimized/tests".to_string(),
            }],
            ..test_config()
        };
        let h = harness_with(config, transport, a1());

        let resp = h
            .client
            .send(ApiRequest::get("/tests/7").header("X-Request-Source", "cli"))
            .await
            .unwrap();
        assert_eq!(resp.body, Body::Empty);

        let calls = h.transport.calls();
        assert_eq!(calls[0].url, "http://api.test/optimized/tests/7");
        assert_eq!(calls[0].header("x-request-source"), Some("cli"));
        assert_eq!(calls[0].header("authorization"), Some("Bearer A1"));
        assert!(h.client.recorder().stats("/optimized/tests/1").is_some());
    }

    #[tokio::test]
    async fn test_refresh_and_retry_over_http() {
        let mut server = mockito::Server::new_async().await;
        let expired = server
            .mock("GET", "/tests")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"detail":"token expired"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "R1"})))
            .with_status(200)
            .with_body(r#"{"access_token":"A2","refresh_token":"R2"}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/tests")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_body(r#"[{"name":"MBTI"}]"#)
            .expect(1)
            .create_async()
            .await;

        let config = Config {
            api_base_url: server.url(),
            ..test_config()
        };
        let store = Arc::new(TokenStore::load(
            Box::new(MemoryStorage::with_credentials(CredentialPair::new(
                "A1", "R1",
            ))),
            Duration::from_secs(3600),
        ));
        let client = ApiClient::new(
            &config,
            Arc::new(ReqwestTransport::new()),
            store.clone(),
            Arc::new(CountingRedirect::default()),
        );

        let resp = client.get("/tests").await.unwrap();
        assert_eq!(resp.body, Body::Json(json!([{"name": "MBTI"}])));

        expired.assert_async().await;
        refresh.assert_async().await;
        fresh.assert_async().await;
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));
    }
}
