use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::StorageConfig;

/// Project-local config file name.
pub const PROJECT_CONFIG: &str = ".devlog.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .devlog.yml in current directory
    /// 3. ~/.config/devlog/devlog.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(PROJECT_CONFIG);
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load {}: {}", PROJECT_CONFIG, e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml_str(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorageConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_to_local_json() {
        let config = AppConfig::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.storage.kind(), "json");
    }

    #[test]
    fn test_storage_section_is_parsed() {
        let config = AppConfig::from_yaml_str("log_level: debug\nstorage:\n  type: sqlite\n  file_path: /tmp/devlog.db\n")
            .unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite(SqliteStorageConfig {
                file_path: PathBuf::from("/tmp/devlog.db"),
            })
        );
    }

    #[test]
    fn test_missing_storage_uses_default() {
        let config = AppConfig::from_yaml_str("log_level: warn\n").unwrap();
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_unknown_storage_type_is_rejected() {
        let err = AppConfig::from_yaml_str("storage:\n  type: redis\n").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown storage type 'redis'"));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "storage:\n  type: json\n  directory: /tmp/devlog-entries").unwrap();
        let config = AppConfig::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.storage, StorageConfig::json("/tmp/devlog-entries"));
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let missing = PathBuf::from("/nonexistent/devlog.yml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }
}
