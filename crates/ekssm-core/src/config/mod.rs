//! Configuration management for ekssm

mod settings;
pub mod serde_utils;

pub use settings::Config;

use crate::error::{EkssmError, Result};
use std::path::{Path, PathBuf};

/// Get the default base directory (`~/.ekssm`)
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ekssm")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_base_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(EkssmError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| EkssmError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| EkssmError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Resolve the effective configuration.
///
/// An explicitly passed path must exist; the default path is optional and
/// falls back to built-in defaults when absent.
pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_config(&default_path)
            } else {
                tracing::debug!("No config file at {:?}, using defaults", default_path);
                Ok(Config::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let err = resolve(Some(&path)).unwrap_err();
        assert!(matches!(err, EkssmError::Config(_)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "remote_port = 8443\nregion = \"eu-west-1\"\nlock_timeout = 250\n",
        )
        .unwrap();

        let loaded = resolve(Some(&path)).unwrap();
        assert_eq!(loaded.remote_port, 8443);
        assert_eq!(loaded.region.as_deref(), Some("eu-west-1"));
        assert_eq!(loaded.lock_timeout, std::time::Duration::from_millis(250));
        assert_eq!(loaded.plugin_stop_timeout, Config::default().plugin_stop_timeout);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "remote_port = \"not a number\"").unwrap();
        let err = load_config::<Config>(&path).unwrap_err();
        assert!(matches!(err, EkssmError::Config(_)));
    }
}
