//! Operator profile storage
//!
//! Holds the signed-in operator's [`User`] so the UI can show who is logged
//! in without a round trip. It holds no tokens and is never used to decide
//! what the operator may do; the console's cookies and the upstream remain
//! the only authority.
//!
//! A file-backed store writes with temp-file + rename and 0600 permissions.
//! An unreadable or corrupt file is treated as "no profile" rather than an
//! error, since the next login rewrites it anyway.

use std::path::{Path, PathBuf};

use member_api::User;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub struct ProfileStore {
    path: Option<PathBuf>,
    state: Mutex<Option<User>>,
}

impl ProfileStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(None),
        }
    }

    /// Open a file-backed store, reading any profile already on disk.
    pub async fn load(path: PathBuf) -> Self {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<User>(&contents) {
                Ok(user) => {
                    info!(path = %path.display(), user_id = %user.id, "loaded operator profile");
                    Some(user)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable profile file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read profile file");
                None
            }
        };

        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    pub async fn get(&self) -> Option<User> {
        self.state.lock().await.clone()
    }

    /// Replace the stored profile and persist it.
    pub async fn save(&self, user: User) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(path) = &self.path {
            write_atomic(path, &user).await?;
        }
        debug!(user_id = %user.id, "stored operator profile");
        *state = Some(user);
        Ok(())
    }

    /// Forget the profile. The in-memory copy is dropped even if removing
    /// the file fails.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = None;
        let Some(path) = &self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed operator profile");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Profile(format!("removing profile file: {e}"))),
        }
    }
}

async fn write_atomic(path: &Path, user: &User) -> Result<()> {
    let json = serde_json::to_string_pretty(user)
        .map_err(|e| Error::Profile(format!("serializing profile: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Profile("profile path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".profile.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Profile(format!("writing temp profile file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Profile(format!("setting profile file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Profile(format!("renaming temp profile file: {e}")))?;
    Ok(())
}
