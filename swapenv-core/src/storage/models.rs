//! Data model shared by the registry, the snapshot store and the pairing session.

use crate::{Result, SwapenvError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Fixed metadata fields that sit next to environment names inside a snapshot.
pub const METADATA_FIELDS: [&str; 5] = ["id", "owner", "localDirectory", "createdAt", "modifiedAt"];

/// Environment names that would collide with a snapshot metadata field.
pub fn is_reserved_environment(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

/// One `KEY=VALUE` line of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvValue {
    pub key: String,
    #[serde(rename = "val")]
    pub value: String,
    /// 1-based position at parse time.
    pub order: usize,
    /// Blank lines preceding the entry in its source file.
    pub spacing: usize,
}

impl EnvValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>, order: usize) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            order,
            spacing: 0,
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}={}", self.order, self.key, self.value)
    }
}

/// A named, ordered list of values ("dev", "prod", "common", ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub values: Vec<EnvValue>,
}

impl Environment {
    pub fn new(name: impl Into<String>, values: Vec<EnvValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One immutable capture of every environment of a project.
///
/// On disk the snapshot is flattened: a single top-level key (the project
/// name) maps to an object holding the metadata fields and one array per
/// environment. `to_json` / `from_json` translate between that layout and
/// this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub project_name: String,
    pub owner: String,
    pub local_directory: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub environments: BTreeMap<String, Vec<EnvValue>>,
}

impl Snapshot {
    pub fn new(
        project_name: impl Into<String>,
        owner: impl Into<String>,
        local_directory: impl Into<String>,
        environments: BTreeMap<String, Vec<EnvValue>>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            project_name: project_name.into(),
            owner: owner.into(),
            local_directory: local_directory.into(),
            created_at: now,
            modified_at: now,
            environments,
        }
    }

    pub fn environment(&self, name: &str) -> Option<&[EnvValue]> {
        self.environments.get(name).map(Vec::as_slice)
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Serialize into the flattened on-disk document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut inner = Map::new();
        inner.insert("id".to_string(), Value::from(self.id.clone()));
        inner.insert("owner".to_string(), Value::from(self.owner.clone()));
        inner.insert(
            "localDirectory".to_string(),
            Value::from(self.local_directory.clone()),
        );
        inner.insert("createdAt".to_string(), Value::from(self.created_at));
        inner.insert("modifiedAt".to_string(), Value::from(self.modified_at));

        for (name, values) in &self.environments {
            if is_reserved_environment(name) {
                return Err(SwapenvError::InvalidInput(format!(
                    "Environment name '{}' is reserved",
                    name
                )));
            }
            inner.insert(name.clone(), serde_json::to_value(values)?);
        }

        let mut outer = Map::new();
        outer.insert(self.project_name.clone(), Value::Object(inner));
        Ok(serde_json::to_vec_pretty(&Value::Object(outer))?)
    }

    /// Parse the flattened on-disk document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let (project_name, mut fields) = split_document(bytes)?;

        let text_field = |fields: &mut Map<String, Value>, name: &str| -> String {
            match fields.remove(name) {
                Some(Value::String(s)) => s,
                _ => String::new(),
            }
        };
        let id = text_field(&mut fields, "id");
        let owner = text_field(&mut fields, "owner");
        let local_directory = text_field(&mut fields, "localDirectory");
        let created_at = fields
            .remove("createdAt")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        let modified_at = fields
            .remove("modifiedAt")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();

        let mut environments = BTreeMap::new();
        for (name, value) in fields {
            let values = parse_environment(&name, value)?;
            environments.insert(name, values);
        }

        Ok(Self {
            id,
            project_name,
            owner,
            local_directory,
            created_at,
            modified_at,
            environments,
        })
    }
}

/// Unwrap the single project key of a snapshot document.
pub(crate) fn split_document(bytes: &[u8]) -> Result<(String, Map<String, Value>)> {
    let outer: Map<String, Value> = serde_json::from_slice(bytes)?;
    if outer.len() != 1 {
        return Err(SwapenvError::NotFound(format!(
            "Invalid snapshot: expected 1 project, got {}",
            outer.len()
        )));
    }

    let (project_name, inner) = outer
        .into_iter()
        .next()
        .ok_or_else(|| SwapenvError::NotFound("Invalid snapshot: no project".to_string()))?;

    match inner {
        Value::Object(fields) => Ok((project_name, fields)),
        _ => Err(SwapenvError::Serialization(format!(
            "Snapshot body for '{}' is not an object",
            project_name
        ))),
    }
}

pub(crate) fn parse_environment(name: &str, value: Value) -> Result<Vec<EnvValue>> {
    serde_json::from_value(value).map_err(|e| {
        SwapenvError::Serialization(format!("Failed to parse environment '{}': {}", name, e))
    })
}

/// One row of the registry table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryEntry {
    /// Global key; also the storage path segment under the base directory.
    pub project_name: String,
    /// Environment currently materialized in the bound directory, or empty.
    pub current_env: String,
    /// Directory bound to this project, empty when unbound.
    pub local_path: PathBuf,
    pub current_version: u32,
    pub latest_version: u32,
    #[serde(rename = "versionNames")]
    pub version_labels: BTreeMap<u32, String>,
}

impl RegistryEntry {
    pub fn new(project_name: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            project_name: project_name.into(),
            local_path: local_path.into(),
            ..Self::default()
        }
    }

    pub fn is_bound(&self) -> bool {
        !self.local_path.as_os_str().is_empty()
    }

    pub fn label_of(&self, version: u32) -> Option<&str> {
        self.version_labels.get(&version).map(String::as_str)
    }

    /// Reverse lookup of a label.
    pub fn version_labelled(&self, label: &str) -> Option<u32> {
        self.version_labels
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(v, _)| *v)
    }
}
