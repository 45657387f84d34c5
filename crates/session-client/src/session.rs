//! Login and logout for the console client

use std::sync::Arc;

use member_api::User;
use tracing::{info, warn};

use crate::coordinator::{Coordinator, SessionState};
use crate::error::Result;

/// Signs the operator in and out and keeps the stored profile in step.
#[derive(Clone)]
pub struct Session {
    coordinator: Arc<Coordinator>,
}

impl Session {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Sign in through the cookie gateway. On success the console has set
    /// the session cookies and the returned profile is stored for display.
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let user = self.coordinator.relay().login(username, password).await?;
        self.coordinator.profile().save(user.clone()).await?;
        self.coordinator.set_session_state(SessionState::Active);
        info!(user_id = %user.id, role = ?user.role, "signed in");
        Ok(user)
    }

    /// Sign out. Local state is cleared even when the console cannot be
    /// reached, so this never fails.
    pub async fn logout(&self) {
        if let Err(e) = self.coordinator.relay().logout().await {
            warn!(error = %e, "logout request failed, clearing local session anyway");
        }
        if let Err(e) = self.coordinator.profile().clear().await {
            warn!(error = %e, "failed to clear stored profile");
        }
        self.coordinator.set_session_state(SessionState::LoginRequired);
    }

    /// Profile of the signed-in operator, if any. For display only.
    pub async fn current_user(&self) -> Option<User> {
        self.coordinator.profile().get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileStore;
    use crate::relay::RelayResponse;
    use crate::testing::{MockRelay, operator};
    use reqwest::StatusCode;
    use std::sync::atomic::Ordering;

    fn session(relay: Arc<MockRelay>) -> (Session, Arc<Coordinator>) {
        let coordinator = Arc::new(Coordinator::new(relay, Arc::new(ProfileStore::in_memory())));
        (Session::new(coordinator.clone()), coordinator)
    }

    fn relay() -> MockRelay {
        MockRelay::new(|_| RelayResponse::new(StatusCode::OK, "{}"))
    }

    #[tokio::test]
    async fn login_stores_profile_and_reactivates_session() {
        let (session, coordinator) = session(Arc::new(relay().expired()));
        coordinator.set_session_state(SessionState::LoginRequired);

        let user = session.login("admin", "pw").await.unwrap();

        assert_eq!(user, operator());
        assert_eq!(session.current_user().await, Some(operator()));
        assert_eq!(coordinator.session_state(), SessionState::Active);
    }

    #[tokio::test]
    async fn failed_login_stores_nothing() {
        let (session, _) = session(Arc::new(relay()));

        let err = session.login("admin", "wrong").await.unwrap_err();

        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(err.status(), Some(401));
        assert!(session.current_user().await.is_none());
    }

    #[tokio::test]
    async fn logout_clears_profile() {
        let relay = Arc::new(relay());
        let (session, coordinator) = session(relay.clone());
        session.login("admin", "pw").await.unwrap();

        session.logout().await;

        assert!(session.current_user().await.is_none());
        assert_eq!(relay.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.session_state(), SessionState::LoginRequired);
    }

    #[tokio::test]
    async fn logout_clears_profile_even_when_console_fails() {
        let (session, _) = session(Arc::new(relay().failing_logout()));
        session.login("admin", "pw").await.unwrap();

        session.logout().await;

        assert!(session.current_user().await.is_none());
    }
}
