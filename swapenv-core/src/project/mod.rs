//! Project workflows driven from a working directory.
//!
//! A [`ProjectContext`] ties the working directory to its registry entry and
//! current snapshot; the functions in [`ops`] implement load, switch, spit,
//! version management and info on top of it.

pub mod ops;


pub use ops::{
    environment_names, info, list_versions, load_environments, rename_version, rollback,
    set_version, show_version, spit, switch_environment, LoadOutcome, ProjectInfo, SwitchOptions,
    VersionListing, VersionSummary,
};

use crate::platform::current_owner;
use crate::storage::{Registry, RegistryEntry};
use crate::{Result, SwapenvError};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Everything a workflow needs to know about the project bound to a directory.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project_name: String,
    pub owner: String,
    pub local_directory: PathBuf,
    pub home_directory: PathBuf,
    /// Snapshot of the current version; v1 when nothing was loaded yet.
    pub snapshot_path: PathBuf,
    pub entry: RegistryEntry,
}

impl ProjectContext {
    /// Context for the project bound to `cwd`, without creating anything.
    pub fn open(registry: &Registry, cwd: &Path) -> Result<Option<Self>> {
        match registry.find_by_local_path(cwd)? {
            Some(entry) => Self::from_entry(registry, cwd, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`open`](Self::open), failing when no project is bound to `cwd`.
    pub fn require(registry: &Registry, cwd: &Path) -> Result<Self> {
        Self::open(registry, cwd)?.ok_or_else(|| {
            SwapenvError::NotFound(
                "no project under current directory, use `swapenv load` to initiate".to_string(),
            )
        })
    }

    /// Context for `cwd`, registering a new project when none is bound.
    ///
    /// The new project is named after the directory. While that name is
    /// taken, ancestor directory names are prefixed (`parent/name`,
    /// `grandparent/parent/name`, ...), then a numeric suffix is tried.
    pub fn resolve(registry: &Registry, cwd: &Path) -> Result<Self> {
        if let Some(entry) = registry.find_by_local_path(cwd)? {
            return Self::from_entry(registry, cwd, entry);
        }

        let project_name = unique_project_name(registry, cwd)?;
        let entry = RegistryEntry::new(project_name.clone(), cwd);
        registry.upsert(entry.clone())?;
        info!("Registered project '{}' at {:?}", project_name, cwd);

        Self::from_entry(registry, cwd, entry)
    }

    fn from_entry(registry: &Registry, cwd: &Path, entry: RegistryEntry) -> Result<Self> {
        let project_name = entry.project_name.clone();

        let entry = if registry.migrate_if_needed(&project_name)? {
            registry
                .find_by_name(&project_name)?
                .ok_or_else(|| SwapenvError::NotFound(format!("Project '{}' not found", project_name)))?
        } else {
            entry
        };

        let store = registry.store();
        let home_directory = store.home_directory(&project_name)?;
        let version = entry.current_version.max(1);
        let snapshot_path = store.version_file_path(&project_name, version)?;
        debug!("Project '{}' resolved to {:?}", project_name, snapshot_path);

        Ok(Self {
            project_name,
            owner: current_owner(),
            local_directory: cwd.to_path_buf(),
            home_directory,
            snapshot_path,
            entry,
        })
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_path.is_file()
    }
}

const MAX_NAME_SUFFIX: u32 = 1000;

fn unique_project_name(registry: &Registry, cwd: &Path) -> Result<String> {
    let base_name = dir_name(cwd)?;
    let mut segments: Vec<&str> = cwd
        .components()
        .rev()
        .map_while(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    segments.reverse();

    for depth in 1..=segments.len() {
        let candidate = segments[segments.len() - depth..].join("/");
        if registry.find_by_name(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }

    for suffix in 2..=MAX_NAME_SUFFIX {
        let candidate = format!("{}-{}", base_name, suffix);
        if registry.find_by_name(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }

    Err(SwapenvError::Conflict(format!(
        "No free project name for {:?}",
        cwd
    )))
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SwapenvError::InvalidInput(format!("Cannot derive a project name from {:?}", path))
        })
}
