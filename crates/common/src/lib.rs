//! Types shared by the member console crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
