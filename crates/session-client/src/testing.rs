//! In-process relay double shared by the unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use member_api::{Role, User};
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::relay::{Relay, RelayFuture, RelayRequest, RelayResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshMode {
    /// Refresh succeeds and later sends are authorized.
    Grant,
    /// Refresh reports success but the session stays expired.
    GrantWithoutEffect,
    Reject,
    Unreachable,
}

type Responder = Box<dyn Fn(&RelayRequest) -> RelayResponse + Send + Sync>;

/// Answers 401 while the session is expired and delegates to `responder`
/// otherwise. Counts every call so tests can assert on traffic.
pub(crate) struct MockRelay {
    authorized: AtomicBool,
    refresh_mode: RefreshMode,
    refresh_delay: Mutex<Duration>,
    logout_fails: bool,
    responder: Responder,
    requests: Mutex<Vec<RelayRequest>>,
    pub sends: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub logouts: AtomicUsize,
}

pub(crate) fn operator() -> User {
    User {
        id: "1".into(),
        email: "admin@example.com".into(),
        role: Role::Admin,
        region: None,
    }
}

impl MockRelay {
    pub fn new(responder: impl Fn(&RelayRequest) -> RelayResponse + Send + Sync + 'static) -> Self {
        Self {
            authorized: AtomicBool::new(true),
            refresh_mode: RefreshMode::Grant,
            refresh_delay: Mutex::new(Duration::ZERO),
            logout_fails: false,
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        }
    }

    pub fn expired(self) -> Self {
        self.expire();
        self
    }

    pub fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    pub fn refresh_delay(self, delay: Duration) -> Self {
        self.set_refresh_delay(delay);
        self
    }

    pub fn failing_logout(mut self) -> Self {
        self.logout_fails = true;
        self
    }

    pub fn expire(&self) {
        self.authorized.store(false, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn sent_paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn last_request(&self) -> Option<RelayRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn answer(&self, request: &RelayRequest) -> RelayResponse {
        if self.authorized.load(Ordering::SeqCst) {
            (self.responder)(request)
        } else {
            RelayResponse::new(StatusCode::UNAUTHORIZED, r#"{"message":"Unauthorized"}"#)
        }
    }
}

impl Relay for MockRelay {
    fn send<'a>(&'a self, request: &'a RelayRequest) -> RelayFuture<'a, RelayResponse> {
        Box::pin(async move {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.answer(request))
        })
    }

    fn refresh(&self) -> RelayFuture<'_, bool> {
        Box::pin(async move {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            let delay = *self.refresh_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.refresh_mode {
                RefreshMode::Grant => {
                    self.authorized.store(true, Ordering::SeqCst);
                    Ok(true)
                }
                RefreshMode::GrantWithoutEffect => Ok(true),
                RefreshMode::Reject => Ok(false),
                RefreshMode::Unreachable => Err(Error::Transport("connection refused".into())),
            }
        })
    }

    fn login<'a>(&'a self, username: &'a str, password: &'a str) -> RelayFuture<'a, User> {
        Box::pin(async move {
            if username == "admin" && password == "pw" {
                self.authorized.store(true, Ordering::SeqCst);
                Ok(operator())
            } else {
                Err(Error::Api {
                    status: 401,
                    message: "Invalid credentials".into(),
                })
            }
        })
    }

    fn logout(&self) -> RelayFuture<'_, ()> {
        Box::pin(async move {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            self.authorized.store(false, Ordering::SeqCst);
            if self.logout_fails {
                return Err(Error::Transport("connection reset".into()));
            }
            Ok(())
        })
    }

    fn download<'a>(&'a self, path: &'a str) -> RelayFuture<'a, RelayResponse> {
        Box::pin(async move {
            let request = RelayRequest::get(path);
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.answer(&request))
        })
    }
}

pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> RelayResponse {
    RelayResponse::new(status, body.to_string())
}

pub(crate) fn result_status<T>(result: &Result<T>) -> Option<u16> {
    result.as_ref().err().and_then(Error::status)
}
