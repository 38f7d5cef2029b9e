//! Platform-specific locations and identity lookups

use std::path::PathBuf;

/// Get the default directory holding the registry, snapshots and credentials
///
/// Returns `~/.swapenv`, or `./.swapenv` when no home directory is known.
pub fn get_default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".swapenv")
}

/// Get the platform-specific config directory
///
/// Returns:
/// - Windows: %APPDATA%\swapenv
/// - macOS: ~/Library/Application Support/swapenv
/// - Linux/Other: ~/.config/swapenv
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("swapenv")
}

/// Get the default settings file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Name of the local user, recorded as the owner of new snapshots
pub fn current_owner() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_dir() {
        let dir = get_default_base_dir();
        assert!(dir.to_string_lossy().ends_with(".swapenv"));
    }

    #[test]
    fn test_default_config_path() {
        let path = get_default_config_path();
        assert!(path.to_string_lossy().ends_with("config.toml"));
        assert!(path.parent().unwrap().ends_with("swapenv"));
    }

    #[test]
    fn test_current_owner_not_empty() {
        assert!(!current_owner().is_empty());
    }
}
