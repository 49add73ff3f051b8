use crate::error::VaultError;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DATABASES_DIR: &str = "databases";
pub const BACKUP_DIR: &str = "Data_Base";
pub const EXPORTS_DIR: &str = "Exports";

/// Which engine backs every logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root folder holding databases, backups and exports.
    pub app_root: PathBuf,
    pub storage_backend: StorageBackend,
    pub loglevel: String,
    /// Hours between automatic full backups; 0 disables the scheduler.
    pub auto_backup_hours: u64,
    /// Seconds between automatic queue replays; 0 disables it.
    pub auto_sync_secs: u64,
    pub sync_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("malwa_crm"),
            storage_backend: StorageBackend::Sqlite,
            loglevel: "info".to_string(),
            auto_backup_hours: 24,
            auto_sync_secs: 30,
            sync_max_retries: 3,
        }
    }
}

impl Config {
    /// Defaults overlaid with `VAULT_*` environment variables.
    pub fn from_env() -> Result<Self, VaultError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("VAULT_"))
            .extract()
            .map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Convenience for tests and embedding: everything under `app_root`.
    pub fn rooted(app_root: impl Into<PathBuf>, storage_backend: StorageBackend) -> Self {
        Self {
            app_root: app_root.into(),
            storage_backend,
            ..Self::default()
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.app_root.join(DATABASES_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.app_root.join(BACKUP_DIR)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.app_root.join(EXPORTS_DIR)
    }

    pub fn auto_backup_interval(&self) -> Option<Duration> {
        (self.auto_backup_hours > 0).then(|| Duration::from_secs(self.auto_backup_hours * 3600))
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        (self.auto_sync_secs > 0).then(|| Duration::from_secs(self.auto_sync_secs))
    }
}
