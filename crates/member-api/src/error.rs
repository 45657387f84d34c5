//! Error types for upstream API calls

/// Errors from talking to the upstream auth/member API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a response (connect, DNS, TLS).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The upstream did not answer within the client timeout.
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// The upstream answered with a non-success status. `body` is kept
    /// verbatim so relays can forward it unchanged.
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A success response whose body did not match the expected shape.
    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl Error {
    /// Status code reported by the upstream, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a reqwest transport failure.
    pub(crate) fn transport(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(format!("{context}: {err}"))
        } else {
            Error::Http(format!("{context}: {err}"))
        }
    }
}

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;
