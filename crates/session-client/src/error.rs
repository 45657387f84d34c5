//! Error types for console client operations

/// Errors surfaced to the UI layer. Every variant carries a message fit for
/// display; the UI only shows it, never interprets it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The console could not be reached at all.
    #[error("request to console failed: {0}")]
    Transport(String),

    /// The console (or the upstream behind the relay) answered with a
    /// non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// A success response whose body did not match the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Reading or writing the persisted operator profile failed.
    #[error("profile storage error: {0}")]
    Profile(String),
}

impl Error {
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
