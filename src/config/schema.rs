use crate::error::{PullError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PathsConfig {
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,
    #[serde(default = "default_job_file")]
    pub job_file: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("modelpull")
}
fn runtime_dir() -> PathBuf {
    std::env::temp_dir().join("modelpull")
}
fn default_catalog() -> PathBuf {
    data_dir().join("presets.toml")
}
fn default_install_root() -> PathBuf {
    data_dir().join("models")
}
fn default_scratch_dir() -> PathBuf {
    runtime_dir().join("scratch")
}
fn default_progress_file() -> PathBuf {
    runtime_dir().join("progress.json")
}
fn default_job_file() -> PathBuf {
    runtime_dir().join("job.json")
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("modelpull/{}", env!("CARGO_PKG_VERSION"))
}
fn default_progress_interval_ms() -> u64 {
    1000
}
fn default_min_free_space_mb() -> u64 {
    100
}
fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            install_root: default_install_root(),
            scratch_dir: default_scratch_dir(),
            progress_file: default_progress_file(),
            job_file: default_job_file(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            progress_interval_ms: default_progress_interval_ms(),
            min_free_space_mb: default_min_free_space_mb(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PullError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| PullError::Config(format!("Failed to parse {}: {e}", path.display())))
    }
}

/// Resolve the config file path
///
/// `MODELPULL_CONFIG` wins, then `$XDG_CONFIG_HOME/modelpull/config.toml`,
/// then `~/.config/modelpull/config.toml`.
pub fn config_path() -> Result<PathBuf> {
    if let Ok(explicit) = std::env::var("MODELPULL_CONFIG") {
        return Ok(PathBuf::from(explicit));
    }

    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        let home = std::env::var("HOME")
            .map_err(|_| PullError::Config("HOME env var not set".to_string()))?;
        PathBuf::from(home).join(".config")
    };

    Ok(config_dir.join("modelpull").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            install_root = "/srv/models"

            [server]
            poll_interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.install_root, PathBuf::from("/srv/models"));
        assert_eq!(config.paths.progress_file, default_progress_file());
        assert_eq!(config.server.poll_interval_ms, 500);
        assert_eq!(config.server.bind, "127.0.0.1:8765");
        assert_eq!(config.download.connect_timeout_secs, 30);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.poll_interval_ms, 2000);
        assert_eq!(config.download.progress_interval_ms, 1000);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[server\nbind = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    #[serial]
    fn test_config_path_env_override() {
        std::env::set_var("MODELPULL_CONFIG", "/tmp/custom-modelpull.toml");
        let path = config_path().unwrap();
        std::env::remove_var("MODELPULL_CONFIG");

        assert_eq!(path, PathBuf::from("/tmp/custom-modelpull.toml"));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var("MODELPULL_CONFIG", temp_dir.path().join("absent.toml"));
        let config = Config::load().unwrap();
        std::env::remove_var("MODELPULL_CONFIG");

        assert_eq!(config.server.bind, "127.0.0.1:8765");
    }
}
