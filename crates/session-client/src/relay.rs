//! Transport between the client and the console
//!
//! The [`Relay`] trait is the seam the coordinator is written against: it
//! sends one request through the console's proxy endpoint and calls the
//! cookie gateway. [`HttpRelay`] is the real implementation; it keeps the
//! console's HttpOnly cookies in a reqwest cookie store and never sees the
//! tokens as values it can read.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use member_api::User;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Boxed future returned by [`Relay`] methods, keeping the trait
/// dyn-compatible (`Arc<dyn Relay>`).
pub type RelayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One call to be forwarded to the upstream API by the console relay.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    /// Upstream path including any query string, e.g. `/members?pageIndex=0`.
    pub path: String,
    /// JSON text sent verbatim for methods that carry a body.
    pub body: Option<String>,
}

impl RelayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Request with a JSON-serialized body.
    pub fn with_json<T: Serialize>(method: Method, path: impl Into<String>, body: &T) -> Result<Self> {
        let body = serde_json::to_string(body).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Self {
            method,
            path: path.into(),
            body: Some(body),
        })
    }
}

/// Status, headers, and raw body of a relayed response.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<serde_json::Value>,
}

impl RelayResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }

    /// The upstream's `message` field when the body carries one, otherwise
    /// `fallback`. NestJS-style validation errors put an array there; its
    /// entries are joined.
    pub fn error_message(&self, fallback: &str) -> String {
        let message = serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.message);
        match message {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
                .collect::<Vec<_>>()
                .join(", "),
            _ => fallback.to_owned(),
        }
    }

    /// Convert a non-success response into an [`Error::Api`].
    pub fn into_error(self, fallback: &str) -> Error {
        Error::Api {
            status: self.status.as_u16(),
            message: self.error_message(fallback),
        }
    }
}

/// Access to the console's proxy relay and cookie gateway.
pub trait Relay: Send + Sync {
    /// Forward one request through `/api/proxy`. Any status, including 401,
    /// is an `Ok` response; only transport failures are errors.
    fn send<'a>(&'a self, request: &'a RelayRequest) -> RelayFuture<'a, RelayResponse>;

    /// Ask the gateway to rotate the cookie pair. `Ok(false)` means the
    /// gateway rejected the refresh and the session is over.
    fn refresh(&self) -> RelayFuture<'_, bool>;

    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> RelayFuture<'a, User>;

    fn logout(&self) -> RelayFuture<'_, ()>;

    /// `GET` a console-local endpoint (export, QR image) with the session
    /// cookies attached.
    fn download<'a>(&'a self, path: &'a str) -> RelayFuture<'a, RelayResponse>;
}

#[derive(Deserialize)]
struct LoginReply {
    user: User,
}

/// [`Relay`] over HTTP against a running console.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRelay {
    /// Relay with its own in-memory cookie store.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self::from_client(http, base_url))
    }

    /// Relay sharing an existing cookie jar, so other clients in the same
    /// process (page loads, downloads) ride the same session.
    pub fn with_cookie_jar(
        base_url: impl Into<String>,
        jar: Arc<reqwest::cookie::Jar>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self::from_client(http, base_url))
    }

    fn from_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn proxy_url(&self, path: &str) -> String {
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("path", path)
            .finish();
        self.url(&format!("/api/proxy?{qs}"))
    }

    async fn collect(response: reqwest::Response) -> Result<RelayResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;
        Ok(RelayResponse {
            status,
            headers,
            body,
        })
    }
}

impl Relay for HttpRelay {
    fn send<'a>(&'a self, request: &'a RelayRequest) -> RelayFuture<'a, RelayResponse> {
        Box::pin(async move {
            let mut builder = self
                .http
                .request(request.method.clone(), self.proxy_url(&request.path))
                .header(CONTENT_TYPE, "application/json");
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::Transport(format!("{} {}: {e}", request.method, request.path)))?;
            debug!(method = %request.method, path = %request.path, status = %response.status(), "relayed");
            Self::collect(response).await
        })
    }

    fn refresh(&self) -> RelayFuture<'_, bool> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/api/auth/refresh"))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("refresh: {e}")))?;
            Ok(response.status().is_success())
        })
    }

    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> RelayFuture<'a, User> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/api/auth/login"))
                .json(&member_api::LoginRequest {
                    username: username.to_owned(),
                    password: password.to_owned(),
                })
                .send()
                .await
                .map_err(|e| Error::Transport(format!("login: {e}")))?;
            let response = Self::collect(response).await?;
            if !response.is_success() {
                return Err(response.into_error("Login failed."));
            }
            Ok(response.json::<LoginReply>()?.user)
        })
    }

    fn logout(&self) -> RelayFuture<'_, ()> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/api/auth/logout"))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("logout: {e}")))?;
            let response = Self::collect(response).await?;
            if !response.is_success() {
                return Err(response.into_error("Logout failed."));
            }
            Ok(())
        })
    }

    fn download<'a>(&'a self, path: &'a str) -> RelayFuture<'a, RelayResponse> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url(path))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("GET {path}: {e}")))?;
            Self::collect(response).await
        })
    }
}
