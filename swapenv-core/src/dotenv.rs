//! `.env` text codec and environment file discovery.

use crate::storage::EnvValue;
use crate::Result;
use std::path::{Path, PathBuf};

/// File materialized in the working directory by `switch`.
pub const WORKING_ENV_FILE: &str = ".env";

/// Wildcard accepted wherever an environment name selects files.
pub const ALL_ENVIRONMENTS: &str = "*";

/// Parse `.env` text into ordered values.
///
/// Lines are trimmed. `#` comments and lines without `=` are skipped, as are
/// entries with an empty key. Values lose surrounding quotes. `spacing`
/// counts blank lines since the previous entry.
pub fn parse(text: &str) -> Vec<EnvValue> {
    let mut values = Vec::new();
    let mut spacing = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            spacing += 1;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

        let mut entry = EnvValue::new(key, value, values.len() + 1);
        entry.spacing = spacing;
        values.push(entry);
        spacing = 0;
    }

    values
}

/// Render values as `.env` text: `spacing` blank lines before each
/// `KEY=VALUE` line, no trailing newline.
pub fn render(values: &[EnvValue]) -> String {
    let mut out = String::new();
    for value in values {
        for _ in 0..value.spacing {
            out.push('\n');
        }
        out.push_str(&value.key);
        out.push('=');
        out.push_str(&value.value);
        out.push('\n');
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// File name an environment is loaded from and spat to.
pub fn env_file_name(env_name: &str) -> String {
    format!(".{}.env", env_name)
}

/// Environment name encoded in a `.<name>.env` file name, lowercased.
pub fn env_name_from_file(file_name: &str) -> Option<String> {
    let name = file_name.strip_prefix('.')?.strip_suffix(".env")?;
    if name.is_empty() || name.contains('.') {
        return None;
    }
    Some(name.to_lowercase())
}

/// `.<name>.env` files in `dir`, sorted by environment name.
///
/// `env` selects a single environment, or every file with [`ALL_ENVIRONMENTS`].
pub fn find_env_files(dir: &Path, env: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(env_name_from_file) else {
            continue;
        };
        if env == ALL_ENVIRONMENTS || name == env.to_lowercase() {
            found.push((name, entry.path()));
        }
    }

    found.sort();
    Ok(found)
}

/// Read and parse one `.env` file; a missing file reads as empty.
pub fn read_file(path: &Path) -> Result<Vec<EnvValue>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn write_file(path: &Path, values: &[EnvValue]) -> Result<()> {
    std::fs::write(path, render(values))?;
    Ok(())
}
