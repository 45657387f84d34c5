//! Upstream auth and member API client
//!
//! Wraps the three auth endpoints the console relays (login, logout,
//! refresh) and the member listing used server-side by the export. Member
//! CRUD from clients does not go through here: it is relayed byte-for-byte
//! by the console proxy.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::types::{
    LoginRequest, LoginResponse, Member, MemberListResponse, MemberQuery, RawLogin, RawTokens,
    TokenPair,
};

/// Batch size the export uses when walking the member listing.
pub const EXPORT_PAGE_SIZE: u64 = 100;

/// Client bound to one upstream base URL.
///
/// Cheap to clone; the underlying `reqwest::Client` shares its pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url }
    }

    /// The shared HTTP client, for callers that forward raw requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute upstream URL for a path starting with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchange operator credentials for a token pair and profile.
    ///
    /// A non-success status is returned as [`Error::Upstream`] with the body
    /// untouched, so the gateway can forward it as-is.
    #[instrument(skip_all, fields(username = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                username: username.to_owned(),
                password: password.to_owned(),
            })
            .send()
            .await
            .map_err(|e| Error::transport("login request failed", &e))?;

        let raw: RawLogin = decode(response, "login").await?;
        debug!(user_id = %raw.user.id, "upstream login succeeded");
        Ok(LoginResponse {
            tokens: raw.tokens.into(),
            user: raw.user,
        })
    }

    /// Ask the upstream to invalidate an access token.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::transport("logout request failed", &e))?;

        ensure_success(response).await.map(|_| ())
    }

    /// Mint a new token pair from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshBody { refresh_token })
            .send()
            .await
            .map_err(|e| Error::transport("refresh request failed", &e))?;

        let raw: RawTokens = decode(response, "refresh").await?;
        Ok(raw.into())
    }

    /// One page of `GET /members`.
    pub async fn list_members(
        &self,
        access_token: &str,
        query: &MemberQuery,
    ) -> Result<MemberListResponse> {
        let qs = query.to_query_string();
        let url = if qs.is_empty() {
            self.url("/members")
        } else {
            self.url(&format!("/members?{qs}"))
        };

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::transport("member list request failed", &e))?;

        decode(response, "member list").await
    }

    /// Walk every page of the listing matching `filters`.
    ///
    /// Stops once `totalCount` members are collected, or on an empty page so
    /// an inconsistent count cannot loop forever.
    #[instrument(skip_all)]
    pub async fn fetch_all_members(
        &self,
        access_token: &str,
        filters: &MemberQuery,
        page_size: u64,
    ) -> Result<Vec<Member>> {
        let mut all = Vec::new();
        let mut page_index = 0;

        loop {
            let query = MemberQuery {
                page_index: Some(page_index),
                page_size: Some(page_size),
                ..filters.filters_only()
            };
            let page = self.list_members(access_token, &query).await?;
            let received = page.data.len();
            all.extend(page.data);

            if received == 0 || all.len() as u64 >= page.meta.total_count {
                break;
            }
            page_index += 1;
        }

        debug!(members = all.len(), pages = page_index + 1, "fetched full member listing");
        Ok(all)
    }
}

/// Return the response if it is a success, otherwise its status and body.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Err(Error::Upstream {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T> {
    let response = ensure_success(response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::transport(&format!("reading {what} response"), &e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("{what}: {e}")))
}
