//! Authenticated proxy relay
//!
//! `/api/proxy?path=<upstream path>` forwards one call to the upstream API
//! with the access-token cookie turned into a bearer header. The upstream
//! status and body come back verbatim, always labelled JSON. No retry and
//! no interpretation: a 401 is the client coordinator's business.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{error, instrument, warn};

use crate::AppState;
use crate::cookies::{self, ACCESS_COOKIE};
use crate::error::{ConsoleError, new_request_id};

/// Largest request body the relay will buffer.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    pub path: Option<String>,
}

pub async fn proxy_handler(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
    jar: CookieJar,
    request: Request,
) -> Response {
    let request_id = new_request_id();
    let response = proxy_request(&state, params.path, &jar, request, &request_id).await;
    match response {
        Ok(response) => response,
        Err(e) => {
            state.metrics.record_error();
            e.into_response_with_id(&request_id)
        }
    }
}

#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path))]
async fn proxy_request(
    state: &AppState,
    path: Option<String>,
    jar: &CookieJar,
    request: Request,
    request_id: &str,
) -> Result<Response, ConsoleError> {
    let path = path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ConsoleError::BadRequest("path query parameter is required".into()))?;
    if !path.starts_with('/') {
        return Err(ConsoleError::BadRequest(format!(
            "path must start with '/', got: {path}"
        )));
    }
    tracing::Span::current().record("path", path.as_str());

    let method = request.method().clone();
    let body = if method == Method::GET || method == Method::HEAD {
        None
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to read request body");
                ConsoleError::BadRequest(format!("invalid request body: {e}"))
            })?;
        Some(bytes)
    };

    let mut upstream = state
        .upstream
        .http()
        .request(method, state.upstream.url(&path))
        .header(CONTENT_TYPE, "application/json")
        .timeout(state.timeout);
    if let Some(token) = cookies::read(jar, ACCESS_COOKIE) {
        upstream = upstream.header(AUTHORIZATION, format!("Bearer {}", token.expose()));
    }
    if let Some(body) = body.filter(|b| !b.is_empty()) {
        upstream = upstream.body(body);
    }

    let upstream_response = upstream.send().await.map_err(|e| {
        if e.is_timeout() {
            error!(error = %e, "upstream timeout");
            ConsoleError::UpstreamTimeout(state.timeout.as_secs())
        } else {
            error!(error = %e, "upstream request failed");
            ConsoleError::UpstreamUnavailable(e.to_string())
        }
    })?;

    let status = upstream_response.status();
    let bytes = upstream_response.bytes().await.map_err(|e| {
        error!(error = %e, "failed to read upstream response body");
        ConsoleError::UpstreamUnavailable(format!("upstream response read error: {e}"))
    })?;

    Ok(passthrough(status, bytes))
}

/// Upstream status and body, labelled as JSON.
pub fn passthrough(status: StatusCode, body: impl Into<Body>) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.into()).into_response()
}
