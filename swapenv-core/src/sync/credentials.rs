//! Bearer credential persisted between invocations.

use crate::config::StoreConfig;
use crate::{Result, SwapenvError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
    pub org_id: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Credentials {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(chrono::Utc::now().timestamp())
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.token.is_empty() && now < self.expires_at
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("org_id", &self.org_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The credential file, readable and writable by its owner only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::at(config.credentials_path())
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored credentials, expired or not. `None` when no file exists.
    ///
    /// An unreadable or corrupt file is deleted before the error is returned,
    /// so the next login starts clean.
    pub fn load(&self) -> Result<Option<Credentials>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                self.discard();
                return Err(e.into());
            }
        };

        match serde_json::from_slice(&data) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                self.discard();
                Err(SwapenvError::Serialization(format!(
                    "Corrupt credentials file {:?}: {}",
                    self.path, e
                )))
            }
        }
    }

    /// Stored credentials that have not expired.
    pub fn valid(&self) -> Result<Option<Credentials>> {
        Ok(self.load()?.filter(Credentials::is_valid))
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.valid(), Ok(Some(_)))
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(credentials)?;

        let mut file = owner_only_options().open(&self.path)?;
        restrict_permissions(&self.path)?;
        file.write_all(&data)?;
        debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }

    /// Remove the credential file. Returns false when there was none.
    pub fn delete(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete that never masks the caller's error.
    pub(crate) fn discard(&self) {
        match self.delete() {
            Ok(true) => warn!("Removed credentials file {:?}", self.path),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove credentials file {:?}: {}", self.path, e),
        }
    }
}

fn owner_only_options() -> std::fs::OpenOptions {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
