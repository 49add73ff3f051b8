use crate::db::models::payload_from_value;
use crate::db::schema::{BACKUP_HISTORY_TABLE, SYSTEM_MODULE};
use crate::error::VaultError;
use crate::platform::fs::FileSystem;
use crate::service::orchestrator::DatabaseOrchestrator;
use crate::types::backup::{
    BackupHistoryEntry, BackupKind, BackupManifest, BackupOutcome, BackupStatus, FileInfo,
    ImportSummary,
};
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BACKUP_SUFFIX: &str = "_backup.json";

/// Writes and restores one JSON file per logical database and keeps a
/// history of every attempt in `system.backup_history`.
#[derive(Clone)]
pub struct BackupCoordinator {
    inner: Arc<BackupInner>,
}

struct BackupInner {
    orchestrator: Arc<DatabaseOrchestrator>,
    fs: Arc<dyn FileSystem>,
    backup_root: PathBuf,
    auto_backup: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BackupInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .auto_backup
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl BackupCoordinator {
    pub fn new(
        orchestrator: Arc<DatabaseOrchestrator>,
        fs: Arc<dyn FileSystem>,
        backup_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(BackupInner {
                orchestrator,
                fs,
                backup_root: backup_root.into(),
                auto_backup: Mutex::new(None),
            }),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.inner.backup_root
    }

    /// `<backup_root>/<DatabaseName>_backup.json`
    pub fn backup_path(&self, module: &str) -> Result<PathBuf, VaultError> {
        let schema = self.inner.orchestrator.catalog().database(module)?;
        Ok(self
            .inner
            .backup_root
            .join(format!("{}{BACKUP_SUFFIX}", schema.name)))
    }

    /// Export `module` and write it to its backup file, overwriting any
    /// previous one. The attempt is logged to the history either way.
    pub async fn backup_database(&self, module: &str) -> Result<PathBuf, VaultError> {
        self.run_backup(module, BackupKind::Manual).await
    }

    async fn run_backup(&self, module: &str, kind: BackupKind) -> Result<PathBuf, VaultError> {
        let path = self.backup_path(module)?;
        let result = self.write_backup(module, &path).await;
        match &result {
            Ok(written) => {
                info!(module, path = %written.display(), ?kind, "backup written");
                self.log_backup(module, BackupStatus::Success, kind, written, None)
                    .await;
            }
            Err(e) => {
                error!(module, path = %path.display(), ?kind, error = %e, "backup failed");
                self.log_backup(module, BackupStatus::Failed, kind, &path, Some(e.to_string()))
                    .await;
            }
        }
        result
    }

    async fn write_backup(&self, module: &str, path: &Path) -> Result<PathBuf, VaultError> {
        let manifest = self.inner.orchestrator.export_database(module).await?;
        let content = serde_json::to_string_pretty(&manifest)?;
        self.inner
            .fs
            .write_file(path, &content)
            .await
            .map_err(|source| VaultError::BackupIo {
                module: module.to_string(),
                path: path.to_path_buf(),
                source,
            })
    }

    /// Back up every module; one module's failure does not stop the rest.
    pub async fn backup_all_databases(&self) -> BTreeMap<String, BackupOutcome> {
        self.run_all_backups(BackupKind::Manual).await
    }

    async fn run_all_backups(&self, kind: BackupKind) -> BTreeMap<String, BackupOutcome> {
        let modules: Vec<String> = self
            .inner
            .orchestrator
            .catalog()
            .modules()
            .map(str::to_string)
            .collect();
        let mut outcomes = BTreeMap::new();
        for module in modules {
            let outcome = match self.run_backup(&module, kind).await {
                Ok(path) => BackupOutcome::ok(path),
                Err(e) => BackupOutcome::failed(&e),
            };
            outcomes.insert(module, outcome);
        }
        let failed = outcomes.values().filter(|o| !o.success).count();
        info!(modules = outcomes.len(), failed, ?kind, "full backup finished");
        outcomes
    }

    /// Replace the contents of `module` with its backup file.
    pub async fn restore_database(&self, module: &str) -> Result<ImportSummary, VaultError> {
        let path = self.backup_path(module)?;
        let content = match self.inner.fs.read_file(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VaultError::BackupMissing {
                    module: module.to_string(),
                    path,
                });
            }
            Err(source) => {
                return Err(VaultError::BackupIo {
                    module: module.to_string(),
                    path,
                    source,
                });
            }
        };
        let summary = self.restore_from_json(module, &content).await?;
        info!(module, records = summary.total(), path = %path.display(), "database restored");
        Ok(summary)
    }

    /// Import a backup document supplied by the caller.
    pub async fn restore_from_json(
        &self,
        module: &str,
        content: &str,
    ) -> Result<ImportSummary, VaultError> {
        let manifest: BackupManifest =
            serde_json::from_str(content).map_err(|e| VaultError::RestoreParse {
                module: module.to_string(),
                message: e.to_string(),
            })?;
        self.inner
            .orchestrator
            .import_database(module, &manifest)
            .await
    }

    /// Restore every module from its backup file, continuing past failures.
    pub async fn restore_all_databases(&self) -> BTreeMap<String, BackupOutcome> {
        let modules: Vec<String> = self
            .inner
            .orchestrator
            .catalog()
            .modules()
            .map(str::to_string)
            .collect();
        let mut outcomes = BTreeMap::new();
        for module in modules {
            let outcome = match self.restore_database(&module).await {
                Ok(_) => match self.backup_path(&module) {
                    Ok(path) => BackupOutcome::ok(path),
                    Err(e) => BackupOutcome::failed(&e),
                },
                Err(e) => {
                    warn!(module = %module, error = %e, "restore failed");
                    BackupOutcome::failed(&e)
                }
            };
            outcomes.insert(module, outcome);
        }
        outcomes
    }

    /// Backup files currently in the backup folder.
    pub async fn list_backups(&self) -> Result<Vec<FileInfo>, VaultError> {
        let mut files = self.inner.fs.list_files(&self.inner.backup_root).await?;
        files.retain(|f| f.name.ends_with(BACKUP_SUFFIX));
        Ok(files)
    }

    /// Every logged attempt, newest first.
    pub async fn backup_history(&self) -> Result<Vec<BackupHistoryEntry>, VaultError> {
        let records = self
            .inner
            .orchestrator
            .get_all(SYSTEM_MODULE, BACKUP_HISTORY_TABLE)
            .await?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<BackupHistoryEntry>(record.into_value()?) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping unreadable backup history row"),
            }
        }
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }

    pub async fn open_backup_folder(&self) -> Result<(), VaultError> {
        self.inner.fs.open_folder(&self.inner.backup_root).await?;
        Ok(())
    }

    async fn log_backup(
        &self,
        module: &str,
        status: BackupStatus,
        kind: BackupKind,
        path: &Path,
        error_message: Option<String>,
    ) {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let entry = BackupHistoryEntry {
            id: format!("backup_{}_{module}_{}", now.timestamp_millis(), &suffix[..8]),
            module: module.to_string(),
            date: now,
            status,
            kind,
            file_path: path.display().to_string(),
            error_message,
        };
        let written = match serde_json::to_value(&entry)
            .map_err(VaultError::from)
            .and_then(payload_from_value)
        {
            Ok(payload) => {
                self.inner
                    .orchestrator
                    .put_local(SYSTEM_MODULE, BACKUP_HISTORY_TABLE, payload)
                    .await
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(_) => debug!(id = %entry.id, ?status, "backup attempt logged"),
            Err(e) => warn!(module, error = %e, "failed to log backup attempt"),
        }
    }

    /// Back up every module every `interval`, replacing any running
    /// schedule. The first run happens one interval after the call.
    pub fn start_auto_backup(&self, interval: Duration) -> Result<(), VaultError> {
        if interval.is_zero() {
            return Err(VaultError::Config(
                "auto-backup interval must be positive".into(),
            ));
        }
        let weak: Weak<BackupInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticks = IntervalStream::new(interval_at(Instant::now() + interval, interval));
            while ticks.next().await.is_some() {
                let Some(inner) = weak.upgrade() else { break };
                info!("running scheduled backup");
                (BackupCoordinator { inner })
                    .run_all_backups(BackupKind::Auto)
                    .await;
            }
        });

        let mut slot = self
            .inner
            .auto_backup
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "auto-backup scheduled");
        Ok(())
    }

    pub fn stop_auto_backup(&self) -> bool {
        let previous = self
            .inner
            .auto_backup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match previous {
            Some(handle) => {
                handle.abort();
                info!("auto-backup stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_auto_backup_running(&self) -> bool {
        self.inner
            .auto_backup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
