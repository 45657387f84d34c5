//! Upstream auth/member API client
//!
//! The console never stores member data; it talks to a separate API that owns
//! authentication and the roster. This crate holds that API's wire types and
//! the handful of calls the console makes itself:
//!
//! 1. `POST /auth/login` exchanges credentials for a [`TokenPair`] + [`User`]
//! 2. `POST /auth/refresh` trades a refresh token for a new pair
//! 3. `POST /auth/logout` invalidates an access token (best effort)
//! 4. `GET /members` pages through the roster for the spreadsheet export
//!
//! Token material is only ever held in [`common::Secret`].

pub mod client;
pub mod error;
pub mod types;

pub use client::{EXPORT_PAGE_SIZE, UpstreamClient};
pub use error::{Error, Result};
pub use types::{
    LoginRequest, LoginResponse, Member, MemberDetails, MemberListMeta, MemberListResponse,
    MemberQuery, Role, TokenPair, User,
};
