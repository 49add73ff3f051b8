use serde::Serialize;
use sqlx::Error as SqlxError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum VaultError {
    #[error("storage engine unavailable: {0}")]
    StorageUnavailable(String),

    #[error("schema upgrade of {database} failed: {reason}")]
    SchemaUpgrade { database: String, reason: String },

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("unknown table {table} in module {module}")]
    UnknownTable { module: String, table: String },

    #[error("table {table} has no index named {index}")]
    UnknownIndex { table: String, index: String },

    #[error("record {id} not found in {table}")]
    RecordNotFound { table: String, id: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("backup of {module} to {} failed: {source}", path.display())]
    BackupIo {
        module: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup file not found: {}", path.display())]
    BackupMissing { module: String, path: PathBuf },

    #[error("backup for {module} is malformed: {message}")]
    RestoreParse { module: String, message: String },

    #[error("manifest belongs to module {found}, expected {expected}")]
    ManifestMismatch { expected: String, found: String },

    #[error("queue item {id} exhausted after {retries} retries")]
    QueueItemExhausted { id: String, retries: u32 },

    #[error("sync error: {0}")]
    Sync(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable machine-readable classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StorageUnavailable,
    SchemaUpgradeFailure,
    NotFound,
    InvalidInput,
    BackupIoFailure,
    RestoreParseFailure,
    QueueItemExhausted,
    Sync,
    Config,
    Internal,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            VaultError::SchemaUpgrade { .. } => ErrorKind::SchemaUpgradeFailure,
            VaultError::UnknownModule(_)
            | VaultError::UnknownTable { .. }
            | VaultError::UnknownIndex { .. }
            | VaultError::RecordNotFound { .. } => ErrorKind::NotFound,
            VaultError::InvalidRecord(_) | VaultError::ManifestMismatch { .. } => {
                ErrorKind::InvalidInput
            }
            VaultError::BackupIo { .. } | VaultError::BackupMissing { .. } => {
                ErrorKind::BackupIoFailure
            }
            VaultError::RestoreParse { .. } => ErrorKind::RestoreParseFailure,
            VaultError::QueueItemExhausted { .. } => ErrorKind::QueueItemExhausted,
            VaultError::Sync(_) => ErrorKind::Sync,
            VaultError::Config(_) => ErrorKind::Config,
            VaultError::Database(_) | VaultError::Json(_) | VaultError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}
