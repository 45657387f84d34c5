//! Client request coordinator
//!
//! Every member API call goes through [`Coordinator::request`]. A 401 from
//! the relay means the access cookie expired; the coordinator then asks the
//! gateway for a new cookie pair and replays the call exactly once.
//!
//! Refreshes are single-flight. The first call to see a 401 becomes the
//! leader and runs the refresh; calls that see a 401 while it is running
//! park on a oneshot channel and are released, in the order they arrived,
//! once the new cookies are in place. Their replays go out ahead of the
//! leader's own. A replayed call that gets another 401
//! returns it to the caller instead of refreshing again.
//!
//! When the refresh is rejected the session is over: the stored profile is
//! cleared, [`SessionState::LoginRequired`] is published, and every caller
//! gets its original 401 back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::profile::ProfileStore;
use crate::relay::{Relay, RelayRequest, RelayResponse};

/// Whether the client still holds a usable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// The refresh cookie was rejected; the UI must send the operator back
    /// to the login page.
    LoginRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Failed,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// Refresh coordination for one client session.
///
/// Owns the in-flight marker and waiter queue; build one per session and
/// share it behind an `Arc`.
pub struct Coordinator {
    relay: Arc<dyn Relay>,
    profile: Arc<ProfileStore>,
    refresh: Mutex<RefreshState>,
    session: watch::Sender<SessionState>,
}

impl Coordinator {
    pub fn new(relay: Arc<dyn Relay>, profile: Arc<ProfileStore>) -> Self {
        let (session, _) = watch::channel(SessionState::Active);
        Self {
            relay,
            profile,
            refresh: Mutex::new(RefreshState::default()),
            session,
        }
    }

    pub fn relay(&self) -> &Arc<dyn Relay> {
        &self.relay
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }

    /// Watch for the session ending. The UI layer redirects to the login
    /// page when this flips to [`SessionState::LoginRequired`].
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub(crate) fn set_session_state(&self, state: SessionState) {
        self.session.send_replace(state);
    }

    /// Send a request through the relay, refreshing and replaying once on 401.
    pub async fn request(&self, request: &RelayRequest) -> Result<RelayResponse> {
        self.request_with(request, false).await
    }

    /// Like [`request`](Self::request); with `is_retry` set a 401 is returned
    /// as-is and never triggers a refresh.
    pub async fn request_with(
        &self,
        request: &RelayRequest,
        is_retry: bool,
    ) -> Result<RelayResponse> {
        let response = self.relay.send(request).await?;
        if is_retry || !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(method = %request.method, path = %request.path, "401 from relay, waiting on refresh");
        match self.await_refresh().await {
            RefreshOutcome::Refreshed => {
                let replayed = self.relay.send(request).await?;
                if replayed.is_unauthorized() {
                    warn!(path = %request.path, "replay after refresh was still unauthorized");
                }
                Ok(replayed)
            }
            RefreshOutcome::Failed => Ok(response),
        }
    }

    /// Join the running refresh, or lead a new one.
    async fn await_refresh(&self) -> RefreshOutcome {
        let waiter = {
            let mut state = lock(&self.refresh);
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            // sender dropped only if the leader vanished without releasing
            return rx.await.unwrap_or(RefreshOutcome::Failed);
        }

        let leader = LeaderGuard {
            state: &self.refresh,
            armed: true,
        };
        let outcome = self.run_refresh().await;
        leader.release(outcome);
        if outcome == RefreshOutcome::Refreshed {
            // queued calls replay before the leader's own
            tokio::task::yield_now().await;
        }
        outcome
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        match self.relay.refresh().await {
            Ok(true) => {
                info!("session refreshed");
                RefreshOutcome::Refreshed
            }
            Ok(false) => {
                warn!("refresh rejected, login required");
                self.end_session().await;
                RefreshOutcome::Failed
            }
            Err(e) => {
                warn!(error = %e, "refresh request failed, login required");
                self.end_session().await;
                RefreshOutcome::Failed
            }
        }
    }

    async fn end_session(&self) {
        if let Err(e) = self.profile.clear().await {
            warn!(error = %e, "failed to clear stored profile");
        }
        self.set_session_state(SessionState::LoginRequired);
    }
}

/// Clears the in-flight marker and wakes every waiter. Waiters are released
/// as failed if the leader's future is dropped mid-refresh.
struct LeaderGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn release(mut self, outcome: RefreshOutcome) {
        self.armed = false;
        release_waiters(self.state, outcome);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            release_waiters(self.state, RefreshOutcome::Failed);
        }
    }
}

fn release_waiters(state: &Mutex<RefreshState>, outcome: RefreshOutcome) {
    let waiters = {
        let mut state = lock(state);
        state.in_flight = false;
        std::mem::take(&mut state.waiters)
    };
    if !waiters.is_empty() {
        debug!(waiters = waiters.len(), ?outcome, "releasing refresh waiters");
    }
    for waiter in waiters {
        let _ = waiter.send(outcome);
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRelay, RefreshMode, operator};
    use reqwest::StatusCode;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn coordinator(relay: Arc<MockRelay>) -> Arc<Coordinator> {
        Arc::new(Coordinator::new(relay, Arc::new(ProfileStore::in_memory())))
    }

    fn ok_relay() -> MockRelay {
        MockRelay::new(|_| RelayResponse::new(StatusCode::OK, r#"{"ok":true}"#))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_401s_share_one_refresh() {
        let relay = Arc::new(
            ok_relay()
                .expired()
                .refresh_delay(Duration::from_millis(50)),
        );
        let coordinator = coordinator(relay.clone());

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator
                        .request(&RelayRequest::get(format!("/members/{i}")))
                        .await
                })
            })
            .collect();

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status, StatusCode::OK);
        }
        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(relay.sends.load(Ordering::SeqCst), 10);
        assert_eq!(coordinator.session_state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_replay_in_registration_order() {
        let relay = Arc::new(
            ok_relay()
                .expired()
                .refresh_delay(Duration::from_millis(50)),
        );
        let coordinator = coordinator(relay.clone());

        let mut handles = Vec::new();
        for i in 0..4 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .request(&RelayRequest::get(format!("/members/{i}")))
                    .await
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let paths = relay.sent_paths();
        // first four sends are the 401s; waiters replay in arrival order, then the leader
        assert_eq!(
            &paths[4..],
            &["/members/1", "/members/2", "/members/3", "/members/0"]
        );
    }

    #[tokio::test]
    async fn second_401_is_returned_without_another_refresh() {
        let relay = Arc::new(ok_relay().expired().refresh_mode(RefreshMode::GrantWithoutEffect));
        let coordinator = coordinator(relay.clone());

        let response = coordinator
            .request(&RelayRequest::get("/members"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(relay.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_flag_skips_refresh() {
        let relay = Arc::new(ok_relay().expired());
        let coordinator = coordinator(relay.clone());

        let response = coordinator
            .request_with(&RelayRequest::get("/members"), true)
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(relay.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_401_errors_pass_through() {
        let relay = Arc::new(MockRelay::new(|_| {
            RelayResponse::new(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"boom"}"#)
        }));
        let coordinator = coordinator(relay.clone());

        let response = coordinator
            .request(&RelayRequest::get("/members"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_ends_session_for_every_caller() {
        let relay = Arc::new(
            ok_relay()
                .expired()
                .refresh_mode(RefreshMode::Reject)
                .refresh_delay(Duration::from_millis(50)),
        );
        let profile = Arc::new(ProfileStore::in_memory());
        profile.save(operator()).await.unwrap();
        let coordinator = Arc::new(Coordinator::new(relay.clone(), profile.clone()));
        let mut session = coordinator.subscribe();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.request(&RelayRequest::get("/members")).await })
            })
            .collect();
        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        }

        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(relay.sends.load(Ordering::SeqCst), 3, "no replays after a failed refresh");
        assert!(profile.get().await.is_none());
        session.changed().await.unwrap();
        assert_eq!(*session.borrow(), SessionState::LoginRequired);
    }

    #[tokio::test]
    async fn unreachable_refresh_is_treated_as_rejected() {
        let relay = Arc::new(ok_relay().expired().refresh_mode(RefreshMode::Unreachable));
        let coordinator = coordinator(relay.clone());

        let response = coordinator
            .request(&RelayRequest::get("/members"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(coordinator.session_state(), SessionState::LoginRequired);
    }

    #[tokio::test]
    async fn later_expiry_starts_a_fresh_refresh() {
        let relay = Arc::new(ok_relay().expired());
        let coordinator = coordinator(relay.clone());

        coordinator.request(&RelayRequest::get("/members")).await.unwrap();
        relay.expire();
        let response = coordinator.request(&RelayRequest::get("/members")).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(relay.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_leader_releases_waiters() {
        let relay = Arc::new(
            ok_relay()
                .expired()
                .refresh_delay(Duration::from_secs(60)),
        );
        let coordinator = coordinator(relay.clone());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request(&RelayRequest::get("/members/1")).await })
        };
        tokio::task::yield_now().await;
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request(&RelayRequest::get("/members/2")).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);

        // the marker was cleared, so the next 401 can lead a new refresh
        relay.set_refresh_delay(Duration::ZERO);
        let response = coordinator.request(&RelayRequest::get("/members/3")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
}
