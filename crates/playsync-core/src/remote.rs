//! Remote sync client boundary.
//!
//! Every outbound call to the backend goes through [`RemoteSyncClient`].
//! Implementations never raise: a transport failure comes back as
//! [`ApiResponse::fail`], and callers turn statuses into [`Error`] kinds with
//! [`ApiResponse::into_result`] when they need to distinguish them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{SERVER_ONLINE_KEY, SessionCache};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Path of the reachability check.
pub const PING_PATH: &str = "/ping";

/// Status part of an [`ApiResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The remote answered with this HTTP status.
    Http(u16),
    /// The call never completed.
    Fail,
}

/// `{status, data}` result of a remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// HTTP status or `fail`.
    pub status: ResponseStatus,
    /// Decoded JSON body, `Null` when absent or undecodable.
    pub data: Value,
}

impl ApiResponse {
    /// A 200 response carrying `data`.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self::with_status(200, data)
    }

    /// A response with an explicit HTTP status.
    #[must_use]
    pub const fn with_status(status: u16, data: Value) -> Self {
        Self {
            status: ResponseStatus::Http(status),
            data,
        }
    }

    /// The failure sentinel for calls that never completed.
    #[must_use]
    pub const fn fail() -> Self {
        Self {
            status: ResponseStatus::Fail,
            data: Value::Null,
        }
    }

    /// HTTP status code, if the call completed.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self.status {
            ResponseStatus::Http(code) => Some(code),
            ResponseStatus::Fail => None,
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ResponseStatus::Http(200..=299))
    }

    /// Convert into the body or the matching error kind.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ResponseStatus::Fail => Err(Error::network_error("remote call failed")),
            ResponseStatus::Http(code) => match Error::from_status(code) {
                Some(err) => Err(err),
                None => Ok(self.data),
            },
        }
    }
}

/// Outbound calls to the remote backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// `GET path`.
    async fn get(&self, path: &str, token: Option<String>) -> ApiResponse;

    /// `POST path` with a JSON body.
    async fn post(&self, path: &str, body: Value, token: Option<String>) -> ApiResponse;

    /// `PUT path` with a JSON body.
    async fn put(&self, path: &str, body: Value, token: Option<String>) -> ApiResponse;
}

/// Source of the app token used on authenticated calls.
#[cfg_attr(test, mockall::automock)]
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when the user has none yet.
    fn app_token(&self) -> Option<String>;
}

/// Token provider backed by a fixed value.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Provider that always yields `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Provider that never yields a token.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn app_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// [`RemoteSyncClient`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteClient {
    /// Build a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Self::with_timeout(&config.api_endpoint, config.request_timeout())
    }

    /// Build a client for an explicit base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::network_error(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, token: Option<String>) -> ApiResponse {
        let request = match token {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Remote call failed: {}", e);
                return ApiResponse::fail();
            }
        };

        let status = response.status().as_u16();
        let data = match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            }
            Ok(_) => Value::Null,
            Err(e) => {
                warn!("Failed to read remote response body: {}", e);
                Value::Null
            }
        };

        debug!("Remote responded with HTTP {}", status);
        ApiResponse::with_status(status, data)
    }
}

#[async_trait]
impl RemoteSyncClient for HttpRemoteClient {
    async fn get(&self, path: &str, token: Option<String>) -> ApiResponse {
        debug!("GET {}", path);
        self.send(self.client.get(self.url(path)), token).await
    }

    async fn post(&self, path: &str, body: Value, token: Option<String>) -> ApiResponse {
        debug!("POST {}", path);
        let request = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        self.send(request, token).await
    }

    async fn put(&self, path: &str, body: Value, token: Option<String>) -> ApiResponse {
        debug!("PUT {}", path);
        let request = self
            .client
            .put(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        self.send(request, token).await
    }
}

/// Whether the backend answers the reachability check, memoized in the cache.
pub async fn server_is_online(remote: &dyn RemoteSyncClient, cache: &SessionCache) -> bool {
    if let Some(online) = cache.get::<bool>(SERVER_ONLINE_KEY).await {
        return online;
    }

    let online = remote.get(PING_PATH, None).await.is_ok();
    cache.put(SERVER_ONLINE_KEY, &online).await;
    debug!("Server online: {}", online);
    online
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result_classifies_statuses() {
        assert!(matches!(
            ApiResponse::with_status(429, Value::Null).into_result(),
            Err(Error::RateLimited)
        ));
        assert!(matches!(
            ApiResponse::with_status(503, Value::Null).into_result(),
            Err(Error::ServerError { status: 503 })
        ));
        assert!(matches!(
            ApiResponse::fail().into_result(),
            Err(Error::NetworkUnavailable(_))
        ));
        let body = ApiResponse::ok(json!({"a": 1})).into_result().expect("ok body");
        assert_eq!(body["a"], 1);
    }

    #[test]
    fn test_is_ok_only_for_2xx() {
        assert!(ApiResponse::ok(Value::Null).is_ok());
        assert!(ApiResponse::with_status(204, Value::Null).is_ok());
        assert!(!ApiResponse::with_status(301, Value::Null).is_ok());
        assert!(!ApiResponse::fail().is_ok());
        assert_eq!(ApiResponse::fail().status_code(), None);
    }

    #[test]
    fn test_http_client_url_joining() {
        let client = HttpRemoteClient::with_timeout("http://localhost:5000/", Duration::from_secs(1))
            .expect("client");
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(client.url("/ping"), "http://localhost:5000/ping");
        assert_eq!(client.url("music/session"), "http://localhost:5000/music/session");
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_fail_not_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = HttpRemoteClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(500))
            .expect("client");
        let response = client.get(PING_PATH, None).await;
        assert_eq!(response.status, ResponseStatus::Fail);
    }

    #[tokio::test]
    async fn test_server_is_online_is_memoized() {
        let mut remote = MockRemoteSyncClient::new();
        remote
            .expect_get()
            .withf(|path, token| path == PING_PATH && token.is_none())
            .times(1)
            .returning(|_, _| ApiResponse::ok(Value::Null));

        let cache = SessionCache::default();
        assert!(server_is_online(&remote, &cache).await);
        assert!(server_is_online(&remote, &cache).await);
    }

    #[test]
    fn test_static_token() {
        assert_eq!(StaticToken::new("jwt").app_token().as_deref(), Some("jwt"));
        assert_eq!(StaticToken::none().app_token(), None);
    }
}
