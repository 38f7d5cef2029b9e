//! Per-project directories of immutable, numbered snapshot files.

use crate::config::StoreConfig;
use crate::storage::models::{parse_environment, split_document, EnvValue, Snapshot, METADATA_FIELDS};
use crate::{Result, SwapenvError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the single snapshot file written before versioning existed.
pub const LEGACY_SNAPSHOT_FILE: &str = "project.json";

/// File-backed snapshot store rooted at the configured base directory.
#[derive(Debug, Clone)]
pub struct VersionedStore {
    base_dir: PathBuf,
}

impl VersionedStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
        }
    }

    /// Per-project directory, created on first access.
    pub fn home_directory(&self, project_name: &str) -> Result<PathBuf> {
        let dir = self.base_dir.join(project_name);
        if !dir.exists() {
            debug!("Creating project directory {:?}", dir);
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    pub fn version_file_path(&self, project_name: &str, version: u32) -> Result<PathBuf> {
        Ok(self
            .home_directory(project_name)?
            .join(version_file_name(version)))
    }

    /// Where `version` of a project lives, without creating anything.
    pub fn version_file_location(&self, project_name: &str, version: u32) -> PathBuf {
        self.base_dir
            .join(project_name)
            .join(version_file_name(version))
    }

    pub fn legacy_file_path(&self, project_name: &str) -> Result<PathBuf> {
        Ok(self.home_directory(project_name)?.join(LEGACY_SNAPSHOT_FILE))
    }

    /// Ensure `dir` exists, then write (or overwrite) `path`.
    pub fn write_snapshot(&self, dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(path, bytes)?;
        debug!("Wrote snapshot {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Serialize and store `snapshot` as `version` of its project.
    pub fn write_version(&self, snapshot: &Snapshot, version: u32) -> Result<PathBuf> {
        self.write_encoded_version(&snapshot.project_name, version, &snapshot.to_json()?)
    }

    /// Store an already serialized snapshot as `version`.
    pub fn write_encoded_version(
        &self,
        project_name: &str,
        version: u32,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.home_directory(project_name)?;
        let path = dir.join(version_file_name(version));
        self.write_snapshot(&dir, &path, bytes)?;
        Ok(path)
    }

    pub fn read_snapshot(&self, path: &Path) -> Result<Snapshot> {
        let bytes = read_existing(path)?;
        Snapshot::from_json(&bytes)
    }

    /// Values of one environment in the snapshot at `path`.
    pub fn read_environment(&self, path: &Path, env_name: &str) -> Result<Vec<EnvValue>> {
        let bytes = read_existing(path)?;
        let (_, mut fields) = split_document(&bytes)?;

        if METADATA_FIELDS.contains(&env_name) {
            return Err(not_found_env(env_name));
        }

        let value = fields
            .remove(env_name)
            .ok_or_else(|| not_found_env(env_name))?;
        parse_environment(env_name, value)
    }

    /// Environment names in the snapshot at `path`, metadata fields excluded.
    pub fn list_environments(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = read_existing(path)?;
        let (_, fields) = split_document(&bytes)?;

        Ok(fields
            .keys()
            .filter(|k| !METADATA_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect())
    }

    /// Versions present on disk, ascending.
    pub fn list_versions(&self, project_name: &str) -> Result<Vec<u32>> {
        let dir = self.home_directory(project_name)?;
        let mut versions = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(version) = entry.file_name().to_str().and_then(parse_version_file_name) {
                versions.push(version);
            }
        }

        versions.sort_unstable();
        Ok(versions)
    }

    pub fn version_exists(&self, project_name: &str, version: u32) -> Result<bool> {
        Ok(self.version_file_location(project_name, version).is_file())
    }

    /// Rename a legacy unversioned snapshot to version 1.
    ///
    /// Returns false when there is nothing to migrate.
    pub fn migrate_legacy(&self, project_name: &str) -> Result<bool> {
        let legacy = self.legacy_file_path(project_name)?;
        if !legacy.is_file() {
            return Ok(false);
        }
        let target = self.version_file_path(project_name, 1)?;
        std::fs::rename(&legacy, &target)?;
        debug!("Migrated {:?} to {:?}", legacy, target);
        Ok(true)
    }

    pub fn remove_version(&self, project_name: &str, version: u32) -> Result<()> {
        let path = self.version_file_path(project_name, version)?;
        std::fs::remove_file(&path)?;
        debug!("Removed snapshot {:?}", path);
        Ok(())
    }
}

pub fn version_file_name(version: u32) -> String {
    format!("v{}.json", version)
}

fn parse_version_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('v')?.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            SwapenvError::NotFound(format!("Snapshot {:?} does not exist", path))
        }
        _ => SwapenvError::Io(e),
    })
}

fn not_found_env(env_name: &str) -> SwapenvError {
    SwapenvError::NotFound(format!("Environment '{}' not found in project", env_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, VersionedStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::new(&StoreConfig::new(dir.path()));
        (dir, store)
    }

    fn snapshot(project: &str) -> Snapshot {
        let mut envs = BTreeMap::new();
        envs.insert("dev".to_string(), vec![EnvValue::new("A", "1", 1)]);
        envs.insert("common".to_string(), vec![EnvValue::new("S", "x", 1)]);
        Snapshot::new(project, "alice", "/work", envs)
    }

    #[test]
    fn home_directory_created_on_first_access() {
        let (dir, store) = store();
        let home = store.home_directory("demo").unwrap();
        assert_eq!(home, dir.path().join("demo"));
        assert!(home.is_dir());
    }

    #[test]
    fn version_file_path_is_deterministic() {
        let (dir, store) = store();
        let path = store.version_file_path("demo", 3).unwrap();
        assert_eq!(path, dir.path().join("demo").join("v3.json"));
    }

    #[test]
    fn version_file_location_has_no_side_effects() {
        let (dir, store) = store();
        let path = store.version_file_location("demo", 2);
        assert_eq!(path, dir.path().join("demo").join("v2.json"));
        assert!(!dir.path().join("demo").exists());
        assert!(!store.version_exists("demo", 2).unwrap());
        assert!(!dir.path().join("demo").exists());
    }

    #[test]
    fn read_environment_and_list() {
        let (_dir, store) = store();
        let path = store.write_version(&snapshot("demo"), 1).unwrap();

        let dev = store.read_environment(&path, "dev").unwrap();
        assert_eq!(dev, vec![EnvValue::new("A", "1", 1)]);

        let mut names = store.list_environments(&path).unwrap();
        names.sort();
        assert_eq!(names, vec!["common", "dev"]);
    }

    #[test]
    fn missing_environment_is_not_found() {
        let (_dir, store) = store();
        let path = store.write_version(&snapshot("demo"), 1).unwrap();

        assert!(matches!(
            store.read_environment(&path, "prod"),
            Err(SwapenvError::NotFound(_))
        ));
        assert!(matches!(
            store.read_environment(&path, "owner"),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let (dir, store) = store();
        let path = dir.path().join("nope.json");
        assert!(matches!(
            store.read_environment(&path, "dev"),
            Err(SwapenvError::NotFound(_))
        ));
    }

    #[test]
    fn list_versions_sorted_and_filtered() {
        let (_dir, store) = store();
        for v in [10, 2, 1] {
            store.write_version(&snapshot("demo"), v).unwrap();
        }
        let home = store.home_directory("demo").unwrap();
        std::fs::write(home.join("notes.txt"), b"x").unwrap();
        std::fs::write(home.join("vX.json"), b"{}").unwrap();
        std::fs::write(home.join(LEGACY_SNAPSHOT_FILE), b"{}").unwrap();

        assert_eq!(store.list_versions("demo").unwrap(), vec![1, 2, 10]);
    }

    #[test]
    fn version_file_name_parsing() {
        assert_eq!(parse_version_file_name("v7.json"), Some(7));
        assert_eq!(parse_version_file_name("v.json"), None);
        assert_eq!(parse_version_file_name("v-1.json"), None);
        assert_eq!(parse_version_file_name("v7.json.bak"), None);
    }
}
