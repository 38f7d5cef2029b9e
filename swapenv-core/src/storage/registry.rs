//! The registry table: binds local directories and project names to project state.
//!
//! Every operation reads the whole `map.json`, changes it, and writes it back.

use crate::config::StoreConfig;
use crate::storage::models::RegistryEntry;
use crate::storage::versions::VersionedStore;
use crate::{Result, SwapenvError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reserved version token that always means "the newest version".
pub const LATEST_TOKEN: &str = "latest";

pub struct Registry {
    path: PathBuf,
    store: VersionedStore,
}

impl Registry {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.registry_path(),
            store: VersionedStore::new(config),
        }
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// All entries; a missing registry file reads as empty.
    pub fn entries(&self) -> Result<Vec<RegistryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_entries(&self, entries: &[RegistryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<RegistryEntry>) -> Result<T>) -> Result<T> {
        let mut entries = self.entries()?;
        let out = f(&mut entries)?;
        self.write_entries(&entries)?;
        Ok(out)
    }

    fn modify_project<T>(
        &self,
        project_name: &str,
        f: impl FnOnce(&mut RegistryEntry) -> Result<T>,
    ) -> Result<T> {
        self.modify(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.project_name == project_name)
                .ok_or_else(|| project_not_found(project_name))?;
            f(entry)
        })
    }

    fn require(&self, project_name: &str) -> Result<RegistryEntry> {
        self.find_by_name(project_name)?
            .ok_or_else(|| project_not_found(project_name))
    }

    /// Entry bound to `path`. An empty path never matches.
    pub fn find_by_local_path(&self, path: &Path) -> Result<Option<RegistryEntry>> {
        if path.as_os_str().is_empty() {
            return Ok(None);
        }
        Ok(self.entries()?.into_iter().find(|e| e.local_path == path))
    }

    pub fn find_by_name(&self, project_name: &str) -> Result<Option<RegistryEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.project_name == project_name))
    }

    /// Replace the entry bound to the same local path, or append.
    ///
    /// Unbound entries (empty local path) are matched by project name instead,
    /// so one unbound project never overwrites another.
    pub fn upsert(&self, entry: RegistryEntry) -> Result<()> {
        self.modify(|entries| {
            let slot = if entry.is_bound() {
                entries.iter_mut().find(|e| e.local_path == entry.local_path)
            } else {
                entries
                    .iter_mut()
                    .find(|e| !e.is_bound() && e.project_name == entry.project_name)
            };

            match slot {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            Ok(())
        })
    }

    pub fn update_current_env(&self, project_name: &str, env_name: &str) -> Result<()> {
        self.modify_project(project_name, |entry| {
            entry.current_env = env_name.to_string();
            Ok(())
        })
    }

    pub fn set_current_version(&self, project_name: &str, version: u32) -> Result<()> {
        self.modify_project(project_name, |entry| {
            entry.current_version = version;
            Ok(())
        })
    }

    /// Attach `label` to `version`. A label names at most one version, so
    /// assigning it moves it off any other version.
    pub fn rename_version(&self, project_name: &str, version: u32, label: &str) -> Result<()> {
        if label == LATEST_TOKEN {
            return Err(SwapenvError::InvalidInput(format!(
                "Cannot use '{}' as a version name",
                LATEST_TOKEN
            )));
        }
        if label.trim().is_empty() {
            return Err(SwapenvError::InvalidInput(
                "Version name cannot be empty".to_string(),
            ));
        }

        self.modify_project(project_name, |entry| {
            entry.version_labels.retain(|_, l| l != label);
            entry.version_labels.insert(version, label.to_string());
            Ok(())
        })
    }

    /// Allocate the next version number and make it current.
    pub fn bump_version(&self, project_name: &str) -> Result<u32> {
        self.migrate_if_needed(project_name)?;

        let version = self.modify_project(project_name, |entry| {
            entry.latest_version += 1;
            entry.current_version = entry.latest_version;
            Ok(entry.latest_version)
        })?;
        debug!("Project '{}' bumped to v{}", project_name, version);
        Ok(version)
    }

    /// Turn a user-supplied version token into a version number.
    ///
    /// - `""` is the current version
    /// - `latest` is the latest version, falling back to the current one
    /// - a number must have a snapshot file on disk
    /// - anything else is looked up as a label
    pub fn resolve_version(&self, project_name: &str, token: &str) -> Result<u32> {
        let entry = self.require(project_name)?;

        if token.is_empty() {
            return Ok(entry.current_version);
        }

        if token == LATEST_TOKEN {
            if entry.latest_version > 0 {
                return Ok(entry.latest_version);
            }
            if entry.current_version > 0 {
                return Ok(entry.current_version);
            }
            return Err(SwapenvError::NotFound(format!(
                "No version found for project '{}'",
                project_name
            )));
        }

        if let Ok(version) = token.parse::<u32>() {
            if self.store.version_exists(project_name, version)? {
                return Ok(version);
            }
            return Err(SwapenvError::NotFound(format!(
                "Version {} not found",
                version
            )));
        }

        entry
            .version_labelled(token)
            .ok_or_else(|| SwapenvError::NotFound(format!("Version '{}' not found", token)))
    }

    /// Delete the oldest snapshots beyond the `retain` most recent.
    ///
    /// Labelled versions and the current version are never deleted, whatever
    /// their age. Returns the versions that were removed.
    pub fn prune_versions(&self, project_name: &str, retain: usize) -> Result<Vec<u32>> {
        let entry = match self.find_by_name(project_name)? {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        let versions = self.store.list_versions(project_name)?;
        if versions.len() <= retain {
            return Ok(Vec::new());
        }

        let cutoff = versions.len() - retain;
        let mut removed = Vec::new();
        for &version in &versions[..cutoff] {
            if entry.version_labels.contains_key(&version) || version == entry.current_version {
                debug!("Keeping protected v{} of '{}'", version, project_name);
                continue;
            }
            self.store.remove_version(project_name, version)?;
            removed.push(version);
        }

        if !removed.is_empty() {
            info!("Pruned {} old version(s) of '{}'", removed.len(), project_name);
        }
        Ok(removed)
    }

    /// One-time upgrade of a project that predates versioning.
    ///
    /// Idempotent: does nothing once a latest version is recorded or when no
    /// legacy snapshot exists.
    pub fn migrate_if_needed(&self, project_name: &str) -> Result<bool> {
        let entry = match self.find_by_name(project_name)? {
            Some(entry) => entry,
            None => return Ok(false),
        };
        if entry.latest_version > 0 {
            return Ok(false);
        }
        if !self.store.migrate_legacy(project_name)? {
            return Ok(false);
        }

        self.modify_project(project_name, |entry| {
            entry.current_version = 1;
            entry.latest_version = 1;
            Ok(())
        })?;
        info!("Migrated legacy snapshot of '{}' to v1", project_name);
        Ok(true)
    }

    /// Bind `path` to an existing project.
    ///
    /// Without `force`, fails with `Conflict` when the directory belongs to a
    /// different project or the project is bound to a different directory.
    /// With `force`, the losing entry's binding is cleared.
    pub fn bind_path(&self, project_name: &str, path: &Path, force: bool) -> Result<()> {
        let project = self.require(project_name)?;

        if !force {
            if let Some(existing) = self.find_by_local_path(path)? {
                if existing.project_name != project_name {
                    return Err(SwapenvError::Conflict(format!(
                        "Directory {:?} is already mapped to '{}'",
                        path, existing.project_name
                    )));
                }
            }
            if project.is_bound() && project.local_path != path {
                return Err(SwapenvError::Conflict(format!(
                    "Project '{}' is already mapped to {:?}",
                    project_name, project.local_path
                )));
            }
        }

        self.modify(|entries| {
            for entry in entries.iter_mut() {
                if entry.project_name == project_name {
                    entry.local_path = path.to_path_buf();
                } else if entry.local_path == path {
                    entry.local_path = PathBuf::new();
                }
            }
            Ok(())
        })?;
        info!("Mapped '{}' to {:?}", project_name, path);
        Ok(())
    }
}

fn project_not_found(project_name: &str) -> SwapenvError {
    SwapenvError::NotFound(format!("Project '{}' not found", project_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{EnvValue, Snapshot};
    use std::collections::BTreeMap;

    fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(&StoreConfig::new(dir.path()));
        (dir, registry)
    }

    fn write_versions(registry: &Registry, project: &str, versions: impl IntoIterator<Item = u32>) {
        let mut envs = BTreeMap::new();
        envs.insert("dev".to_string(), vec![EnvValue::new("A", "1", 1)]);
        let snapshot = Snapshot::new(project, "alice", "", envs);
        for v in versions {
            registry.store().write_version(&snapshot, v).unwrap();
        }
    }

    #[test]
    fn empty_registry_reads_as_empty() {
        let (_dir, registry) = registry();
        assert!(registry.entries().unwrap().is_empty());
        assert!(registry.find_by_name("demo").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_by_local_path() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();

        let mut renamed = RegistryEntry::new("demo2", "/work/demo");
        renamed.current_env = "dev".to_string();
        registry.upsert(renamed).unwrap();

        let entries = registry.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].project_name, "demo2");
        assert_eq!(entries[0].current_env, "dev");
    }

    #[test]
    fn upsert_appends_new_path() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("a", "/work/a")).unwrap();
        registry.upsert(RegistryEntry::new("b", "/work/b")).unwrap();
        assert_eq!(registry.entries().unwrap().len(), 2);
    }

    #[test]
    fn unbound_entries_do_not_overwrite_each_other() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("a", "")).unwrap();
        registry.upsert(RegistryEntry::new("b", "")).unwrap();
        assert_eq!(registry.entries().unwrap().len(), 2);
        assert!(registry.find_by_local_path(Path::new("")).unwrap().is_none());
    }

    #[test]
    fn unknown_project_mutations_fail() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.update_current_env("ghost", "dev"),
            Err(SwapenvError::NotFound(_))
        ));
        assert!(matches!(
            registry.set_current_version("ghost", 1),
            Err(SwapenvError::NotFound(_))
        ));
        assert!(matches!(
            registry.bump_version("ghost"),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn bump_version_advances_latest_and_current() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        registry.set_current_version("demo", 0).unwrap();

        assert_eq!(registry.bump_version("demo").unwrap(), 1);
        assert_eq!(registry.bump_version("demo").unwrap(), 2);

        let entry = registry.find_by_name("demo").unwrap().unwrap();
        assert_eq!(entry.latest_version, 2);
        assert_eq!(entry.current_version, 2);
    }

    #[test]
    fn rename_version_rejects_latest() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        assert!(matches!(
            registry.rename_version("demo", 1, "latest"),
            Err(SwapenvError::InvalidInput(_))
        ));
    }

    #[test]
    fn rename_version_moves_label() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        registry.rename_version("demo", 1, "stable").unwrap();
        registry.rename_version("demo", 2, "stable").unwrap();

        let entry = registry.find_by_name("demo").unwrap().unwrap();
        assert_eq!(entry.label_of(1), None);
        assert_eq!(entry.label_of(2), Some("stable"));
    }

    #[test]
    fn resolve_empty_token_is_current() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.current_version = 2;
        entry.latest_version = 4;
        registry.upsert(entry).unwrap();

        assert_eq!(registry.resolve_version("demo", "").unwrap(), 2);
    }

    #[test]
    fn resolve_latest_token() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.current_version = 2;
        entry.latest_version = 4;
        registry.upsert(entry).unwrap();
        assert_eq!(registry.resolve_version("demo", "latest").unwrap(), 4);

        let mut fallback = RegistryEntry::new("legacy", "/work/legacy");
        fallback.current_version = 3;
        registry.upsert(fallback).unwrap();
        assert_eq!(registry.resolve_version("legacy", "latest").unwrap(), 3);

        registry.upsert(RegistryEntry::new("fresh", "/work/fresh")).unwrap();
        assert!(matches!(
            registry.resolve_version("fresh", "latest"),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_numeric_token_requires_file() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        write_versions(&registry, "demo", [1, 2]);

        assert_eq!(registry.resolve_version("demo", "2").unwrap(), 2);
        assert!(matches!(
            registry.resolve_version("demo", "3"),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_label_token() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        registry.rename_version("demo", 2, "stable").unwrap();

        assert_eq!(registry.resolve_version("demo", "stable").unwrap(), 2);
        assert!(matches!(
            registry.resolve_version("demo", "beta"),
            Err(SwapenvError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve_version("ghost", ""),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn prune_keeps_most_recent() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.current_version = 7;
        entry.latest_version = 7;
        registry.upsert(entry).unwrap();
        write_versions(&registry, "demo", 1..=7);

        let removed = registry.prune_versions("demo", 5).unwrap();
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(
            registry.store().list_versions("demo").unwrap(),
            vec![3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn prune_never_counts_labelled_versions() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.current_version = 7;
        entry.latest_version = 7;
        entry.version_labels.insert(2, "stable".to_string());
        registry.upsert(entry).unwrap();
        write_versions(&registry, "demo", 1..=7);

        registry.prune_versions("demo", 5).unwrap();
        assert_eq!(
            registry.store().list_versions("demo").unwrap(),
            vec![2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn prune_keeps_old_current_version() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.current_version = 1;
        entry.latest_version = 4;
        registry.upsert(entry).unwrap();
        write_versions(&registry, "demo", 1..=4);

        registry.prune_versions("demo", 2).unwrap();
        assert_eq!(registry.store().list_versions("demo").unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn migrate_legacy_snapshot() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("demo", "/work/demo")).unwrap();
        let legacy = registry.store().legacy_file_path("demo").unwrap();
        std::fs::write(&legacy, br#"{"demo": {"dev": []}}"#).unwrap();

        assert!(registry.migrate_if_needed("demo").unwrap());
        assert!(!legacy.exists());
        assert_eq!(registry.store().list_versions("demo").unwrap(), vec![1]);

        let entry = registry.find_by_name("demo").unwrap().unwrap();
        assert_eq!((entry.current_version, entry.latest_version), (1, 1));

        // Second call is a no-op
        assert!(!registry.migrate_if_needed("demo").unwrap());
    }

    #[test]
    fn migrate_skips_versioned_projects() {
        let (_dir, registry) = registry();
        let mut entry = RegistryEntry::new("demo", "/work/demo");
        entry.latest_version = 2;
        registry.upsert(entry).unwrap();
        let legacy = registry.store().legacy_file_path("demo").unwrap();
        std::fs::write(&legacy, b"{}").unwrap();

        assert!(!registry.migrate_if_needed("demo").unwrap());
        assert!(legacy.exists());
    }

    #[test]
    fn bind_conflicts_without_force() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("a", "/work/shared")).unwrap();
        registry.upsert(RegistryEntry::new("b", "")).unwrap();

        let err = registry
            .bind_path("b", Path::new("/work/shared"), false)
            .unwrap_err();
        assert!(matches!(err, SwapenvError::Conflict(_)));

        registry.bind_path("b", Path::new("/work/shared"), true).unwrap();
        let a = registry.find_by_name("a").unwrap().unwrap();
        let b = registry.find_by_name("b").unwrap().unwrap();
        assert!(!a.is_bound());
        assert_eq!(b.local_path, PathBuf::from("/work/shared"));
    }

    #[test]
    fn bind_conflicts_when_project_bound_elsewhere() {
        let (_dir, registry) = registry();
        registry.upsert(RegistryEntry::new("a", "/work/one")).unwrap();

        assert!(matches!(
            registry.bind_path("a", Path::new("/work/two"), false),
            Err(SwapenvError::Conflict(_))
        ));
        registry.bind_path("a", Path::new("/work/one"), false).unwrap();
    }
}
