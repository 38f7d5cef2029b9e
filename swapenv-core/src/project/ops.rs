//! Load, switch, spit, version and info workflows.

use super::ProjectContext;
use crate::dotenv::{self, ALL_ENVIRONMENTS};
use crate::merge::{merge, ConflictPriority, MergeConfig};
use crate::storage::{is_reserved_environment, EnvValue, Environment, Registry, Snapshot};
use crate::{Result, SwapenvError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment overlaid beneath every other environment on switch.
pub const COMMON_ENVIRONMENT: &str = "common";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub version: u32,
    pub environments: Vec<String>,
    pub pruned: Vec<u32>,
}

/// Store freshly parsed environments as a new version.
///
/// Each loaded environment is merged over its copy in the current version
/// (loaded values win). Environments that were not loaded are carried
/// forward unchanged. Old versions are pruned down to `max_versions`.
pub fn load_environments(
    registry: &Registry,
    ctx: &ProjectContext,
    loaded: Vec<Environment>,
    max_versions: usize,
) -> Result<LoadOutcome> {
    if loaded.is_empty() {
        return Err(SwapenvError::InvalidInput(
            "No environment files to load".to_string(),
        ));
    }
    if let Some(env) = loaded.iter().find(|e| is_reserved_environment(&e.name)) {
        return Err(SwapenvError::InvalidInput(format!(
            "Environment name '{}' is reserved",
            env.name
        )));
    }

    let store = registry.store();
    let mut environments = if ctx.has_snapshot() {
        store.read_snapshot(&ctx.snapshot_path)?.environments
    } else {
        BTreeMap::new()
    };

    let priority = MergeConfig::with_priority(ConflictPriority::Incoming);
    let mut names = Vec::with_capacity(loaded.len());
    for env in loaded {
        let base = environments.remove(&env.name).unwrap_or_default();
        let merged = merge(&env.values, &base, &priority);
        debug!(
            "Merged '{}': {} loaded, {} previous, {} result",
            env.name,
            env.values.len(),
            base.len(),
            merged.len()
        );
        names.push(env.name.clone());
        environments.insert(env.name, merged);
    }

    // serialize before the registry moves to the new version
    let encoded = Snapshot::new(
        &ctx.project_name,
        &ctx.owner,
        ctx.local_directory.to_string_lossy(),
        environments,
    )
    .to_json()?;
    let version = registry.bump_version(&ctx.project_name)?;
    store.write_encoded_version(&ctx.project_name, version, &encoded)?;
    let pruned = registry.prune_versions(&ctx.project_name, max_versions)?;

    info!(
        "Loaded {} environment(s) into '{}' v{}",
        names.len(),
        ctx.project_name,
        version
    );
    Ok(LoadOutcome {
        version,
        environments: names,
        pruned,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    /// Discard the working values instead of merging into them.
    pub replace: bool,
    /// Do not overlay the `common` environment.
    pub skip_common: bool,
}

/// Compute the values to materialize for `env_name` and record it as current.
///
/// `common` is overlaid beneath the target (target values win, common-only
/// keys come last), then the result is merged into `working`, the values
/// currently in the working file.
pub fn switch_environment(
    registry: &Registry,
    ctx: &ProjectContext,
    env_name: &str,
    working: &[EnvValue],
    options: SwitchOptions,
) -> Result<Vec<EnvValue>> {
    if env_name == COMMON_ENVIRONMENT {
        return Err(SwapenvError::InvalidInput(format!(
            "'{}' is merged into every environment and cannot be switched to",
            COMMON_ENVIRONMENT
        )));
    }

    let store = registry.store();
    let mut target = store.read_environment(&ctx.snapshot_path, env_name)?;
    target.sort_by_key(|v| v.order);

    if !options.skip_common {
        match store.read_environment(&ctx.snapshot_path, COMMON_ENVIRONMENT) {
            Ok(mut common) => {
                common.sort_by_key(|v| v.order);
                target = merge(
                    &common,
                    &target,
                    &MergeConfig::with_priority(ConflictPriority::Current),
                );
            }
            Err(SwapenvError::NotFound(_)) => {
                debug!("No '{}' environment to overlay", COMMON_ENVIRONMENT)
            }
            Err(e) => return Err(e),
        }
    }

    let config = if options.replace {
        MergeConfig::replacing()
    } else {
        MergeConfig::with_priority(ConflictPriority::Incoming)
    };
    let values = merge(&target, working, &config);

    registry.update_current_env(&ctx.project_name, env_name)?;
    info!("Switched '{}' to {}", ctx.project_name, env_name);
    Ok(values)
}

/// Write one environment, or all of them with `*`, as `.<env>.env` files in `out_dir`.
pub fn spit(
    registry: &Registry,
    ctx: &ProjectContext,
    env: &str,
    out_dir: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let store = registry.store();
    let names = store.list_environments(&ctx.snapshot_path)?;

    let targets = if env == ALL_ENVIRONMENTS {
        names
    } else if names.iter().any(|n| n == env) {
        vec![env.to_string()]
    } else {
        return Err(SwapenvError::NotFound(format!(
            "Environment '{}' not found",
            env
        )));
    };

    let mut written = Vec::with_capacity(targets.len());
    for name in targets {
        let values = store.read_environment(&ctx.snapshot_path, &name)?;
        let path = out_dir.join(dotenv::env_file_name(&name));
        dotenv::write_file(&path, &values)?;
        written.push((name, path));
    }
    Ok(written)
}

/// Environment names of the current version; empty before the first load.
pub fn environment_names(registry: &Registry, ctx: &ProjectContext) -> Result<Vec<String>> {
    if !ctx.has_snapshot() {
        return Ok(Vec::new());
    }
    registry.store().list_environments(&ctx.snapshot_path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSummary {
    pub current: u32,
    pub current_label: Option<String>,
    pub latest: u32,
}

impl fmt::Display for VersionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "current: v{}", self.current)?;
        if let Some(label) = &self.current_label {
            write!(f, " ({})", label)?;
        }
        write!(f, "\nlatest:  v{}", self.latest)
    }
}

pub fn show_version(ctx: &ProjectContext) -> VersionSummary {
    VersionSummary {
        current: ctx.entry.current_version,
        current_label: ctx.entry.label_of(ctx.entry.current_version).map(str::to_string),
        latest: ctx.entry.latest_version,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionListing {
    pub version: u32,
    pub label: Option<String>,
    pub is_current: bool,
    pub is_latest: bool,
}

impl fmt::Display for VersionListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_current { "* " } else { "  " };
        write!(f, "{}{}", marker, self.version)?;
        if let Some(label) = &self.label {
            write!(f, " ({})", label)?;
        }
        if self.is_latest {
            write!(f, " [latest]")?;
        }
        Ok(())
    }
}

pub fn list_versions(registry: &Registry, ctx: &ProjectContext) -> Result<Vec<VersionListing>> {
    let entry = &ctx.entry;
    Ok(registry
        .store()
        .list_versions(&ctx.project_name)?
        .into_iter()
        .map(|version| VersionListing {
            version,
            label: entry.label_of(version).map(str::to_string),
            is_current: version == entry.current_version,
            is_latest: version == entry.latest_version,
        })
        .collect())
}

/// Make the version named by `token` current.
pub fn set_version(registry: &Registry, ctx: &ProjectContext, token: &str) -> Result<u32> {
    let version = registry.resolve_version(&ctx.project_name, token)?;
    registry.set_current_version(&ctx.project_name, version)?;
    info!("'{}' now at v{}", ctx.project_name, version);
    Ok(version)
}

/// Label the version named by `token`. Labelled versions survive pruning.
pub fn rename_version(
    registry: &Registry,
    ctx: &ProjectContext,
    token: &str,
    label: &str,
) -> Result<u32> {
    let version = registry.resolve_version(&ctx.project_name, token)?;
    registry.rename_version(&ctx.project_name, version, label)?;
    Ok(version)
}

/// Step back `steps` versions along the versions on disk, stopping at the oldest.
pub fn rollback(registry: &Registry, ctx: &ProjectContext, steps: usize) -> Result<u32> {
    if steps == 0 {
        return Err(SwapenvError::InvalidInput(
            "steps must be a positive integer".to_string(),
        ));
    }

    let versions = registry.store().list_versions(&ctx.project_name)?;
    let current = versions
        .iter()
        .position(|&v| v == ctx.entry.current_version)
        .ok_or_else(|| SwapenvError::NotFound("current version not found".to_string()))?;

    let version = versions[current.saturating_sub(steps)];
    registry.set_current_version(&ctx.project_name, version)?;
    info!("Rolled '{}' back to v{}", ctx.project_name, version);
    Ok(version)
}

/// Project summary for shell prompts and editor integrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub env: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub version: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub latest_version: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ProjectInfo {
    /// `project:env` (or just `env`), `none` standing in for an unset
    /// environment. `None` outside a project.
    pub fn plain(&self, env_only: bool) -> Option<String> {
        if self.project.is_empty() {
            return None;
        }
        let env = if self.env.is_empty() { "none" } else { self.env.as_str() };
        if env_only {
            Some(env.to_string())
        } else {
            Some(format!("{}:{}", self.project, env))
        }
    }
}

/// Summary of the project bound to `cwd`. Never fails: lookup problems
/// yield an empty summary.
pub fn info(registry: &Registry, cwd: &Path) -> ProjectInfo {
    let entry = match registry.find_by_local_path(cwd) {
        Ok(Some(entry)) => entry,
        Ok(None) => return ProjectInfo::default(),
        Err(e) => {
            debug!("Registry lookup failed: {}", e);
            return ProjectInfo::default();
        }
    };

    let version = if entry.current_version == 0 {
        entry.latest_version
    } else {
        entry.current_version
    };

    let mut envs = Vec::new();
    if version > 0 {
        let store = registry.store();
        let path = store.version_file_location(&entry.project_name, version);
        envs = store.list_environments(&path).unwrap_or_default();
    }

    ProjectInfo {
        project: entry.project_name,
        env: entry.current_env,
        envs,
        version: entry.current_version,
        latest_version: entry.latest_version,
    }
}
