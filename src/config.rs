//! API key resolution.
//!
//! Precedence: `VOX_API_KEY` in the environment, then `config.json` in the
//! platform config directory (e.g. `~/.config/vox/config.json` on Linux).

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_API_KEY: &str = "VOX_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "no API key found: set {ENV_API_KEY} or add \"api_key\" to {0}"
    )]
    NotLoggedIn(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    api_key: String,
}

pub fn config_file_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "vox").map(|dirs| dirs.config_dir().join("config.json"))
}

/// Resolve the API key from the environment or the config file.
pub fn load_api_key() -> Result<String, ConfigError> {
    if let Ok(key) = std::env::var(ENV_API_KEY) {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let path = config_file_path();
    let display = path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "the config file".to_string());

    if let Some(path) = &path {
        match std::fs::read(path) {
            Ok(data) => {
                let config: ConfigFile =
                    serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
                        path: display.clone(),
                        source,
                    })?;
                if !config.api_key.is_empty() {
                    return Ok(config.api_key);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConfigError::Read {
                    path: display,
                    source,
                });
            }
        }
    }

    Err(ConfigError::NotLoggedIn(display))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_parses_api_key() {
        let config: ConfigFile = serde_json::from_str(r#"{"api_key": "sk-123"}"#).unwrap();
        assert_eq!(config.api_key, "sk-123");
    }

    #[test]
    fn test_config_file_tolerates_missing_key() {
        let config: ConfigFile = serde_json::from_str("{}").unwrap();
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_config_file_path_is_stable() {
        if let Some(path) = config_file_path() {
            assert!(path.ends_with("config.json"));
        }
    }
}
