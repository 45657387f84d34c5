//! Client side of the member console
//!
//! Talks to the console over HTTP and never holds a token: the session
//! lives in HttpOnly cookies kept by the HTTP client's cookie store. All
//! member calls go through one [`Coordinator`], which turns an expired
//! access cookie into a single shared refresh and one replay per call.
//!
//! ```text
//! MemberApi ──► Coordinator ──► Relay ──► /api/proxy ──► upstream
//!                    │ 401
//!                    └──► Relay::refresh ──► /api/auth/refresh
//! ```

pub mod coordinator;
pub mod error;
pub mod members;
pub mod profile;
pub mod relay;
pub mod session;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

pub use coordinator::{Coordinator, SessionState};
pub use error::{Error, Result};
pub use members::{Download, MemberApi};
pub use profile::ProfileStore;
pub use relay::{HttpRelay, Relay, RelayFuture, RelayRequest, RelayResponse};
pub use session::Session;

/// Everything a UI needs, wired to one coordinator.
#[derive(Clone)]
pub struct ConsoleClient {
    pub session: Session,
    pub members: MemberApi,
    coordinator: Arc<Coordinator>,
}

impl ConsoleClient {
    pub fn new(relay: Arc<dyn Relay>, profile: ProfileStore) -> Self {
        let coordinator = Arc::new(Coordinator::new(relay, Arc::new(profile)));
        Self {
            session: Session::new(coordinator.clone()),
            members: MemberApi::new(coordinator.clone()),
            coordinator,
        }
    }

    /// Client for a console at `base_url`, persisting the operator profile
    /// at `profile_path` when given.
    pub async fn connect(base_url: &str, profile_path: Option<PathBuf>) -> Result<Self> {
        let relay = HttpRelay::new(base_url)?;
        let profile = match profile_path {
            Some(path) => ProfileStore::load(path).await,
            None => ProfileStore::in_memory(),
        };
        Ok(Self::new(Arc::new(relay), profile))
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.coordinator.subscribe()
    }
}
