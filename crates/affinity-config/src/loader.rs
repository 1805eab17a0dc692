use std::path::{Path, PathBuf};

use affinity_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

pub const ENV_REMOTE_URL: &str = "AFFINITY_REMOTE_URL";
pub const ENV_DATABASE_PATH: &str = "AFFINITY_DATABASE_PATH";
pub const ENV_LOCAL_PATH: &str = "AFFINITY_LOCAL_PATH";
pub const ENV_LOG_LEVEL: &str = "AFFINITY_LOG_LEVEL";

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir();
        Ok(Self { config_dir })
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".affinity"));
        let xdg_config = dirs::config_dir().map(|c| c.join("affinity"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                if xdg.exists() || !home.exists() {
                    xdg
                } else {
                    home
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".affinity"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns true if a config file (YAML or TOML) exists on disk.
    pub fn config_file_exists(&self) -> bool {
        self.config_dir.join("config.yml").exists() || self.config_dir.join("config.toml").exists()
    }

    /// Load the config file, then apply environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = self.load_file()?;
        apply_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_file(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [self.config_dir.clone(), self.config_dir.join("data")];

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

/// Apply `AFFINITY_*` overrides using `lookup` to read variables.
pub fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(ENV_REMOTE_URL) {
        config.remote.base_url = Some(url);
    }
    if let Some(path) = non_empty(ENV_DATABASE_PATH) {
        config.storage.database_path = Some(PathBuf::from(path));
    }
    if let Some(path) = non_empty(ENV_LOCAL_PATH) {
        config.storage.local_path = Some(PathBuf::from(path));
    }
    if let Some(level) = non_empty(ENV_LOG_LEVEL) {
        config.log_level = Some(level);
    }
}
