//! User settings and the explicit store configuration derived from them.

use crate::platform::{get_default_base_dir, get_default_config_path};
use crate::{Result, SwapenvError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_VERSIONS: usize = 10;
pub const DEFAULT_SERVER_URL: &str = "https://swapenv.sh";

/// Settings read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub home_directory: Option<PathBuf>,
    pub max_versions: usize,
    pub server_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home_directory: None,
            max_versions: DEFAULT_MAX_VERSIONS,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SwapenvError::InvalidInput(format!("Invalid config {:?}: {}", path, e)))
    }

    /// Load from an explicit path, or from the default location when present.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default_path = get_default_config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    tracing::debug!("No config file at {:?}, using defaults", default_path);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            base_dir: self
                .home_directory
                .clone()
                .unwrap_or_else(get_default_base_dir),
            max_versions: self.max_versions,
        }
    }
}

/// Where the registry and snapshots live, and how many versions to retain.
///
/// Passed to `Registry::new` and `VersionedStore::new`; nothing reads it from
/// process-wide state.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_dir: PathBuf,
    pub max_versions: usize,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions;
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.base_dir.join("map.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.base_dir.join("credentials.json")
    }
}
