//! Session cookie construction
//!
//! The upstream token pair lives only in two HttpOnly cookies. Both are
//! `SameSite=Strict`, `Path=/`, and `Secure` when running in production.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use common::Secret;
use member_api::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// One hour.
pub const ACCESS_MAX_AGE_SECS: i64 = 60 * 60;
/// Thirty days.
pub const REFRESH_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn build(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .build()
    }

    fn session_cookie(&self, name: &'static str, value: &Secret<String>, max_age: i64) -> Cookie<'static> {
        let mut cookie = self.build(name, value.expose().clone());
        cookie.set_max_age(time::Duration::seconds(max_age));
        cookie
    }

    /// Set both session cookies from a freshly minted pair.
    pub fn set_session(&self, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
        jar.add(self.session_cookie(ACCESS_COOKIE, &tokens.access, ACCESS_MAX_AGE_SECS))
            .add(self.session_cookie(REFRESH_COOKIE, &tokens.refresh, REFRESH_MAX_AGE_SECS))
    }

    /// Expire one cookie. A removal cookie is emitted even when the request
    /// did not carry it.
    pub fn remove(&self, jar: CookieJar, name: &'static str) -> CookieJar {
        let mut cookie = self.build(name, String::new());
        cookie.make_removal();
        jar.add(cookie)
    }

    pub fn clear_session(&self, jar: CookieJar) -> CookieJar {
        let jar = self.remove(jar, ACCESS_COOKIE);
        self.remove(jar, REFRESH_COOKIE)
    }
}

/// Value of a session cookie, if the request carried a non-empty one.
pub fn read(jar: &CookieJar, name: &str) -> Option<Secret<String>> {
    jar.get(name)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .map(|v| Secret::new(v.to_owned()))
}
