//! Typed member API over the coordinator
//!
//! Each call maps a non-success response to [`Error::Api`] with a message
//! the UI can show directly. Create and update prefer the upstream's own
//! `message` (validation errors); the rest use a fixed message.

use std::sync::Arc;

use bytes::Bytes;
use member_api::{Member, MemberDetails, MemberListResponse, MemberQuery};
use reqwest::Method;
use reqwest::header::CONTENT_DISPOSITION;

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::relay::{RelayRequest, RelayResponse};

/// A file served by the console for the operator to save.
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct MemberApi {
    coordinator: Arc<Coordinator>,
}

impl MemberApi {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn list(&self, query: &MemberQuery) -> Result<MemberListResponse> {
        let qs = query.to_query_string();
        let path = if qs.is_empty() {
            "/members".to_owned()
        } else {
            format!("/members?{qs}")
        };
        let response = self.coordinator.request(&RelayRequest::get(path)).await?;
        expect_success(response, "Failed to load the member list.", false)?.json()
    }

    pub async fn get(&self, id: &str) -> Result<Member> {
        let response = self
            .coordinator
            .request(&RelayRequest::get(format!("/members/{id}")))
            .await?;
        expect_success(response, "Failed to load the member.", false)?.json()
    }

    pub async fn create(&self, details: &MemberDetails) -> Result<Member> {
        let request = RelayRequest::with_json(Method::POST, "/members", details)?;
        let response = self.coordinator.request(&request).await?;
        expect_success(response, "Failed to create the member.", true)?.json()
    }

    pub async fn update(&self, id: &str, details: &MemberDetails) -> Result<Member> {
        let request = RelayRequest::with_json(Method::PATCH, format!("/members/{id}"), details)?;
        let response = self.coordinator.request(&request).await?;
        expect_success(response, "Failed to update the member.", true)?.json()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .coordinator
            .request(&RelayRequest::delete(format!("/members/{id}")))
            .await?;
        expect_success(response, "Failed to delete the member.", false).map(|_| ())
    }

    /// Download the spreadsheet of every member matching `filters`.
    ///
    /// Goes straight to the console's export endpoint rather than the
    /// relay, so an expired session fails here instead of refreshing.
    pub async fn export_spreadsheet(&self, filters: &MemberQuery) -> Result<Download> {
        let qs = filters.filters_only().to_query_string();
        let path = if qs.is_empty() {
            "/api/members/export".to_owned()
        } else {
            format!("/api/members/export?{qs}")
        };
        let response = self.coordinator.relay().download(&path).await?;
        let response = expect_success(response, "Failed to export members.", false)?;
        Ok(into_download(response, "members.xlsx"))
    }

    /// PNG QR code linking to the member's public page.
    pub async fn qr_code(&self, id: &str) -> Result<Download> {
        let path = format!("/api/members/{id}/qr");
        let response = self.coordinator.relay().download(&path).await?;
        let response = expect_success(response, "Failed to generate the QR code.", false)?;
        Ok(into_download(response, &format!("member-{id}-qr.png")))
    }
}

fn expect_success(
    response: RelayResponse,
    message: &str,
    prefer_upstream_message: bool,
) -> Result<RelayResponse> {
    if response.is_success() {
        return Ok(response);
    }
    if prefer_upstream_message {
        return Err(response.into_error(message));
    }
    Err(Error::Api {
        status: response.status.as_u16(),
        message: message.to_owned(),
    })
}

fn into_download(response: RelayResponse, fallback: &str) -> Download {
    let filename = response
        .headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(attachment_filename)
        .unwrap_or_else(|| fallback.to_owned());
    Download {
        filename,
        bytes: response.body,
    }
}

/// `filename` parameter of an `attachment` Content-Disposition value.
fn attachment_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"');
        (!value.is_empty()).then(|| value.to_owned())
    })
}
