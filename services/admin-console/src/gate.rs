//! Route authorization gate
//!
//! Runs in front of every page under the protected prefixes. A request is
//! let through only when its access-token cookie is a JWT signed with the
//! configured HS256 secret and is not expired. Everything else is sent to
//! `/login?from=<path>`; a cookie that fails verification is also expired
//! so the browser stops presenting it.
//!
//! This only decides whether to render a page. The upstream API still
//! checks the token on every data call.

use std::collections::HashSet;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use common::Secret;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use crate::AppState;
use crate::cookies::{self, ACCESS_COOKIE};

/// Where the login page sends the operator when `from` is absent or unsafe.
pub const DEFAULT_LANDING: &str = "/members";

pub struct GateConfig {
    /// HS256 signing secret. Without it every protected request is
    /// redirected.
    pub secret: Option<Secret<String>>,
    pub protected_prefixes: Vec<String>,
}

impl GateConfig {
    /// Whether `path` is a prefix itself or lies beneath one. Trailing
    /// slashes on a prefix are ignored; a bare `/` covers every path.
    pub fn protects(&self, path: &str) -> bool {
        self.protected_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToLogin {
        /// The presented access cookie failed verification and must be
        /// expired.
        purge_access: bool,
    },
}

pub fn authorize(token: Option<&str>, secret: Option<&Secret<String>>) -> Decision {
    let Some(token) = token else {
        return Decision::RedirectToLogin { purge_access: false };
    };
    let Some(secret) = secret else {
        return Decision::RedirectToLogin { purge_access: false };
    };
    match verify_access_token(token, secret) {
        Ok(_) => Decision::Allow,
        Err(e) => {
            debug!(error = %e, "access token rejected");
            Decision::RedirectToLogin { purge_access: true }
        }
    }
}

/// Check signature and time claims. `exp` and `nbf` are enforced when
/// present, with no leeway; no claim is required.
pub fn verify_access_token(
    token: &str,
    secret: &Secret<String>,
) -> Result<serde_json::Map<String, serde_json::Value>, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let key = DecodingKey::from_secret(secret.expose().as_bytes());
    decode::<serde_json::Map<String, serde_json::Value>>(token, &key, &validation)
        .map(|data| data.claims)
}

/// Same-site path check for redirect targets: must start with a single
/// `/` and contain no `:`. Backslashes are refused too, since browsers read
/// `/\host` as `//host`.
pub fn is_safe_return_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains(':')
        && !path.contains('\\')
}

/// Post-login destination for an untrusted `from` value.
pub fn safe_redirect(from: Option<&str>) -> String {
    match from {
        Some(path) if is_safe_return_path(path) => path.to_owned(),
        _ => DEFAULT_LANDING.to_owned(),
    }
}

/// `/login`, with `from` carried along only when it is a safe path.
pub fn login_redirect_url(path: &str) -> String {
    if !is_safe_return_path(path) {
        return "/login".to_owned();
    }
    let qs = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("from", path)
        .finish();
    format!("/login?{qs}")
}

/// Middleware applied to the whole router; only protected paths are checked.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !state.gate.protects(&path) {
        return next.run(request).await;
    }

    let token = cookies::read(&jar, ACCESS_COOKIE);
    let decision = authorize(
        token.as_ref().map(|t| t.expose().as_str()),
        state.gate.secret.as_ref(),
    );

    match decision {
        Decision::Allow => next.run(request).await,
        Decision::RedirectToLogin { purge_access } => {
            debug!(path = %path, purge_access, "redirecting to login");
            let redirect = Redirect::temporary(&login_redirect_url(&path));
            if purge_access {
                (state.cookies.remove(jar, ACCESS_COOKIE), redirect).into_response()
            } else {
                redirect.into_response()
            }
        }
    }
}
