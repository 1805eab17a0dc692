use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Directory for the server database and the local mirror when no explicit path is set.
    pub fn resolved_data_dir(&self, config_dir: &std::path::Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("data"))
    }

    pub fn database_path(&self, config_dir: &std::path::Path) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir(config_dir).join("affinity.db"))
    }

    pub fn local_store_path(&self, config_dir: &std::path::Path) -> PathBuf {
        self.storage
            .local_path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir(config_dir).join("local-store.db"))
    }
}

/// HTTP API server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10000
}

/// Where the shim finds the remote store. No `base_url` means local-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file behind the HTTP API.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// SQLite file used as the on-device key-value store.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_pairing_window_secs")]
    pub pairing_window_secs: u64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            pairing_window_secs: default_pairing_window_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl ChatConfig {
    pub fn pairing_window(&self) -> chrono::Duration {
        i64::try_from(self.pairing_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn default_pairing_window_secs() -> u64 {
    affinity_common::chat::DEFAULT_PAIRING_WINDOW_SECS
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
        }
    }
}

fn default_recall_limit() -> usize {
    20
}

/// Server-side cleanup of aged chat and low-importance memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: u32,

    #[serde(default = "default_min_importance")]
    pub min_importance: u32,

    /// Run the cleanup on this interval; disabled when unset.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days_to_keep: default_days_to_keep(),
            min_importance: default_min_importance(),
            interval_secs: None,
        }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(u64::from(self.days_to_keep) * 86_400)
    }

    /// Entries created before this instant are eligible for cleanup.
    pub fn cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        chrono::Duration::from_std(self.horizon())
            .ok()
            .and_then(|horizon| now.checked_sub_signed(horizon))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
    }
}

fn default_days_to_keep() -> u32 {
    30
}

fn default_min_importance() -> u32 {
    3
}
