//! Wire types shared by the upstream API, the console, and its clients
//!
//! Field names follow the upstream JSON (camelCase). Token material only ever
//! appears in [`TokenPair`], which wraps both tokens in [`Secret`].

use common::Secret;
use serde::{Deserialize, Serialize};

/// Console role granted by the upstream auth API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
}

/// Non-sensitive profile of the signed-in operator.
///
/// Safe to persist client-side for display; it is never consulted for
/// authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Editable member attributes. Every field is optional so the same type
/// serves as a create/patch payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cathedral: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_num: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_diocese: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A roster entry as returned by the upstream member API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    #[serde(flatten)]
    pub details: MemberDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Pagination block of a member listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberListMeta {
    pub total_count: u64,
    pub page_index: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberListResponse {
    pub data: Vec<Member>,
    pub meta: MemberListMeta,
}

/// Filters and pagination for `GET /members`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cathedral: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_diocese: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl MemberQuery {
    /// The same filters with pagination stripped. Used by the export, which
    /// walks every page itself.
    pub fn filters_only(&self) -> Self {
        Self {
            page_index: None,
            page_size: None,
            ..self.clone()
        }
    }

    /// Query pairs in upstream parameter order. Empty strings are dropped so
    /// an untouched filter form does not narrow the listing.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page_index) = self.page_index {
            pairs.push(("pageIndex", page_index.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("pageSize", page_size.to_string()));
        }
        let filters = [
            ("name", &self.name),
            ("parish", &self.parish),
            ("cathedral", &self.cathedral),
            ("chosenDiocese", &self.chosen_diocese),
            ("region", &self.region),
        ];
        for (key, value) in filters {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                pairs.push((key, value.to_owned()));
            }
        }
        pairs
    }

    /// URL-encoded query string without the leading `?`; empty when no
    /// parameter is set.
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.pairs() {
            serializer.append_pair(key, &value);
        }
        serializer.finish()
    }
}

/// Credentials posted to `/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Access/refresh pair minted by the upstream auth API.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: Secret<String>,
    pub refresh: Secret<String>,
}

/// Raw token fields as they arrive on the wire. Converted to [`TokenPair`]
/// immediately after decoding.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<RawTokens> for TokenPair {
    fn from(raw: RawTokens) -> Self {
        Self {
            access: Secret::new(raw.access_token),
            refresh: Secret::new(raw.refresh_token),
        }
    }
}

/// Successful upstream login: the token pair plus the operator profile.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    pub user: User,
}

#[derive(Deserialize)]
pub(crate) struct RawLogin {
    #[serde(flatten)]
    pub tokens: RawTokens,
    pub user: User,
}
