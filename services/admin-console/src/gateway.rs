//! Token cookie gateway
//!
//! Turns the upstream token pair into HttpOnly cookies so that browser code
//! never sees a token:
//!
//! - `POST /api/auth/login`: credentials in, `{user}` out, cookies set
//! - `POST /api/auth/logout`: best-effort upstream logout, cookies expired
//! - `POST /api/auth/refresh`: refresh cookie traded for a new pair
//!
//! Upstream rejections are forwarded with their status and body untouched.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use member_api::LoginRequest;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::error::{ConsoleError, from_upstream, new_request_id};
use crate::metrics::record_refresh;
use crate::proxy::passthrough;

fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

#[instrument(skip_all, fields(request_id))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    let Json(credentials) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return ConsoleError::BadRequest(format!("invalid login body: {}", rejection.body_text()))
                .into_response_with_id(&request_id);
        }
    };

    match state
        .upstream
        .login(&credentials.username, &credentials.password)
        .await
    {
        Ok(login) => {
            info!(user_id = %login.user.id, "operator signed in");
            let jar = state.cookies.set_session(jar, &login.tokens);
            (jar, Json(serde_json::json!({ "user": login.user }))).into_response()
        }
        Err(member_api::Error::Upstream { status, body }) => {
            info!(status, "upstream rejected login");
            passthrough(upstream_status(status), body)
        }
        Err(e) => {
            warn!(error = %e, "login failed");
            state.metrics.record_error();
            from_upstream(&e, state.timeout.as_secs()).into_response_with_id(&request_id)
        }
    }
}

/// Always succeeds and always expires both cookies.
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(access) = cookies::read(&jar, ACCESS_COOKIE) {
        if let Err(e) = state.upstream.logout(access.expose()).await {
            warn!(error = %e, "upstream logout failed, clearing cookies anyway");
        }
    }
    let jar = state.cookies.clear_session(jar);
    (jar, Json(serde_json::json!({ "ok": true }))).into_response()
}

#[instrument(skip_all, fields(request_id))]
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    let Some(refresh_token) = cookies::read(&jar, REFRESH_COOKIE) else {
        record_refresh("missing");
        return ConsoleError::Unauthorized("refresh token missing".into())
            .into_response_with_id(&request_id);
    };

    match state.upstream.refresh(refresh_token.expose()).await {
        Ok(tokens) => {
            record_refresh("success");
            let jar = state.cookies.set_session(jar, &tokens);
            (jar, Json(serde_json::json!({ "ok": true }))).into_response()
        }
        Err(member_api::Error::Upstream { status, body }) => {
            record_refresh("rejected");
            info!(status, "upstream rejected refresh, clearing session");
            let jar = state.cookies.clear_session(jar);
            (jar, passthrough(upstream_status(status), body)).into_response()
        }
        Err(e) => {
            record_refresh("error");
            warn!(error = %e, "refresh failed, clearing session");
            state.metrics.record_error();
            let jar = state.cookies.clear_session(jar);
            (
                jar,
                from_upstream(&e, state.timeout.as_secs()).into_response_with_id(&request_id),
            )
                .into_response()
        }
    }
}
