// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tabula_store_disk::IoContext;

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "TABULA_CONFIG";
/// Environment variable overriding the data directory.
pub const DATA_PATH_ENV: &str = "TABULA_DATA_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Root of the data directory
    pub data_path: PathBuf,

    /// Save changes in the background
    pub auto_save: bool,

    /// Period between background saves
    pub auto_save_interval_ms: u64,

    /// Report files changed by other writers
    pub watch_external_changes: bool,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            auto_save: true,
            auto_save_interval_ms: 2000,
            watch_external_changes: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults with a different data directory.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .io_context(|| format!("Failed to read config file at {}", path.display()))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration from the environment: the file named by
    /// `TABULA_CONFIG` (or defaults), with `TABULA_DATA_PATH` taking
    /// precedence for the data directory.
    pub fn load() -> Result<Self> {
        Self::resolve(
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            std::env::var_os(DATA_PATH_ENV).map(PathBuf::from),
        )
    }

    fn resolve(config_file: Option<PathBuf>, data_path: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Some(data_path) = data_path {
            config.data_path = data_path;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_save_interval_ms == 0 {
            return Err(Error::config("auto_save_interval_ms must be greater than zero"));
        }
        if self.data_path.as_os_str().is_empty() {
            return Err(Error::config("data_path must not be empty"));
        }
        Ok(())
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_utils_test::CanonicalTempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_path, PathBuf::from("./data"));
        assert!(config.auto_save);
        assert_eq!(config.auto_save_interval(), Duration::from_secs(2));
        assert!(!config.watch_external_changes);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = CanonicalTempDir::new().unwrap();
        let path = dir.path().join("tabula.toml");
        std::fs::write(
            &path,
            "data_path = \"/srv/tabula\"\nauto_save_interval_ms = 500\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_path, PathBuf::from("/srv/tabula"));
        assert_eq!(config.auto_save_interval(), Duration::from_millis(500));
        assert!(config.auto_save);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = CanonicalTempDir::new().unwrap();
        let path = dir.path().join("tabula.toml");
        std::fs::write(&path, "auto_save_interval_ms = 0\n").unwrap();

        assert!(matches!(Config::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_toml() {
        let dir = CanonicalTempDir::new().unwrap();
        let path = dir.path().join("tabula.toml");
        std::fs::write(&path, "auto_save = \"maybe\"\n").unwrap();

        assert!(matches!(Config::from_file(&path), Err(Error::Toml(_))));
        let err = Config::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.is_io_kind(std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_data_path_override() {
        let config = Config::resolve(None, Some(PathBuf::from("/tmp/override"))).unwrap();
        assert_eq!(config.data_path, PathBuf::from("/tmp/override"));
        assert_eq!(config.auto_save_interval_ms, 2000);
    }
}
