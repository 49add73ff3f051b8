use crate::db::models::Record;
use crate::error::{ErrorKind, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// JSON snapshot of one logical database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub module: String,
    pub database: String,
    pub version: u32,
    pub export_date: DateTime<Utc>,
    pub stores: BTreeMap<String, Vec<Record>>,
}

impl BackupManifest {
    pub fn record_count(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }
}

/// Result of exporting every module: successes and per-module failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub manifests: BTreeMap<String, BackupManifest>,
    pub failures: BTreeMap<String, String>,
}

/// Records written per table by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub module: String,
    pub tables: BTreeMap<String, usize>,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.tables.values().sum()
    }
}

/// Per-module result of a bulk backup or restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl BackupOutcome {
    pub fn ok(path: PathBuf) -> Self {
        Self {
            success: true,
            path: Some(path),
            error: None,
            kind: None,
        }
    }

    pub fn failed(err: &VaultError) -> Self {
        Self {
            success: false,
            path: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Manual,
    Auto,
}

/// Row of the `system.backup_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupHistoryEntry {
    pub id: String,
    pub module: String,
    pub date: DateTime<Utc>,
    pub status: BackupStatus,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub file_path: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub count: u64,
    /// Approximate size of the table serialized as JSON, in bytes.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStats {
    pub database: String,
    pub stores: BTreeMap<String, TableStats>,
}

/// Metadata of a file in the backup folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}
