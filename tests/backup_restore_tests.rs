mod common;

use async_trait::async_trait;
use common::{memory_vault, payload, vault_with_fs};
use crm_vault::platform::{FileSystem, LocalFileSystem};
use crm_vault::types::backup::{BackupKind, BackupManifest, BackupStatus, FileInfo};
use crm_vault::{StorageBackend, VaultError};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Local disk, except writes to paths containing `fail_on` are refused.
struct FlakyFs {
    inner: LocalFileSystem,
    fail_on: &'static str,
}

#[async_trait]
impl FileSystem for FlakyFs {
    async fn write_file(&self, path: &Path, content: &str) -> io::Result<PathBuf> {
        if path.to_string_lossy().contains(self.fail_on) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "disk is read-only"));
        }
        self.inner.write_file(path, content).await
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        self.inner.read_file(path).await
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<FileInfo>> {
        self.inner.list_files(dir).await
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        self.inner.delete_file(path).await
    }

    async fn file_exists(&self, path: &Path) -> io::Result<bool> {
        self.inner.file_exists(path).await
    }

    async fn open_folder(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Files kept in memory so scheduler tests never touch blocking I/O.
#[derive(Default)]
struct MemoryFs {
    files: Mutex<HashMap<PathBuf, String>>,
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn write_file(&self, path: &Path, content: &str) -> io::Result<PathBuf> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Ok(path.to_path_buf())
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    async fn list_files(&self, dir: &Path) -> io::Result<Vec<FileInfo>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|(p, _)| p.parent() == Some(dir))
            .map(|(p, c)| FileInfo {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: c.len() as u64,
                created: None,
                modified: None,
            })
            .collect())
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn open_folder(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }
}

async fn export_clear_import_round_trip(backend: StorageBackend) {
    let t = vault_with_fs(backend, Arc::new(LocalFileSystem)).await;
    let orch = &t.vault.orchestrator;

    orch.put("customers", "customers", payload(json!({"id": "c1", "name": "Ravi"})))
        .await
        .expect("put customer");
    orch.put("customers", "customers", payload(json!({"id": "c2", "name": "Simran"})))
        .await
        .expect("put customer");
    orch.put(
        "customers",
        "vehicles",
        payload(json!({"id": "v1", "customer_id": "c1", "vehicle_no": "PB10AB1234"})),
    )
    .await
    .expect("put vehicle");

    let manifest = orch.export_database("customers").await.expect("export");
    assert_eq!(manifest.database, "MalwaCRM_Customers");
    assert_eq!(manifest.record_count(), 3);

    for table in ["customers", "contacts", "addresses", "vehicles"] {
        orch.clear("customers", table).await.expect("clear");
    }
    assert_eq!(orch.count("customers", "customers").await.expect("count"), 0);

    let summary = orch
        .import_database("customers", &manifest)
        .await
        .expect("import");
    assert_eq!(summary.total(), 3);

    let again = orch.export_database("customers").await.expect("re-export");
    assert_eq!(again.stores, manifest.stores);
    orch.close_all().await;
}

#[tokio::test]
async fn export_clear_import_reproduces_tables_in_memory() {
    export_clear_import_round_trip(StorageBackend::Memory).await;
}

#[tokio::test]
async fn export_clear_import_reproduces_tables_in_sqlite() {
    export_clear_import_round_trip(StorageBackend::Sqlite).await;
}

#[tokio::test]
async fn restore_accepts_numeric_ids_and_missing_timestamps() {
    let t = memory_vault().await;
    let raw = json!({
        "module": "jobs",
        "database": "MalwaCRM_Jobs",
        "version": 1,
        "exportDate": "2025-02-01T08:00:00Z",
        "stores": {
            "jobs": [
                {"id": 7, "status": "open", "created_at": "2025-01-05T10:00:00Z"},
                {"id": "j2", "status": "closed"}
            ]
        }
    })
    .to_string();

    let summary = t
        .vault
        .backups
        .restore_from_json("jobs", &raw)
        .await
        .expect("restore legacy manifest");
    assert_eq!(summary.tables["jobs"], 2);

    let orch = &t.vault.orchestrator;
    let numeric = orch
        .get_by_id("jobs", "jobs", "7")
        .await
        .expect("get job")
        .expect("numeric id restored");
    assert_eq!(numeric.str_field("status"), Some("open"));
    assert_eq!(numeric.created_at.to_rfc3339(), "2025-01-05T10:00:00+00:00");
    assert_eq!(numeric.updated_at, numeric.created_at);

    let unstamped = orch
        .get_by_id("jobs", "jobs", "j2")
        .await
        .expect("get job")
        .expect("record without timestamps restored");
    assert!(unstamped.updated_at >= unstamped.created_at);
}

#[tokio::test]
async fn import_rejects_foreign_manifest_without_touching_data() {
    let t = memory_vault().await;
    let orch = &t.vault.orchestrator;
    orch.put("customers", "customers", payload(json!({"id": "c1", "name": "Ravi"})))
        .await
        .expect("put customer");

    let sales = orch.export_database("sales").await.expect("export sales");
    let err = orch
        .import_database("customers", &sales)
        .await
        .expect_err("module mismatch");
    assert!(matches!(err, VaultError::ManifestMismatch { .. }));

    let mut bogus = orch.export_database("customers").await.expect("export");
    bogus.stores.insert("spaceships".to_string(), Vec::new());
    let err = orch
        .import_database("customers", &bogus)
        .await
        .expect_err("unknown table");
    assert!(matches!(err, VaultError::UnknownTable { .. }));

    assert_eq!(orch.count("customers", "customers").await.expect("count"), 1);
}

#[tokio::test]
async fn backup_then_restore_round_trips_through_the_file() {
    let t = memory_vault().await;
    let orch = &t.vault.orchestrator;
    orch.put("inventory", "items", payload(json!({"id": "it1", "name": "Mirror", "quantity": 4})))
        .await
        .expect("put item");

    let path = t
        .vault
        .backups
        .backup_database("inventory")
        .await
        .expect("backup");
    assert_eq!(
        path,
        t.config.backup_dir().join("MalwaCRM_Inventory_backup.json")
    );
    let raw = tokio::fs::read_to_string(&path).await.expect("read backup");
    let manifest: BackupManifest = serde_json::from_str(&raw).expect("parse backup");
    assert_eq!(manifest.module, "inventory");
    assert!(raw.contains("\"exportDate\""));

    orch.put("inventory", "items", payload(json!({"id": "it2", "name": "Grille"})))
        .await
        .expect("put second item");
    orch.delete("inventory", "items", "it1").await.expect("delete");

    let summary = t
        .vault
        .backups
        .restore_database("inventory")
        .await
        .expect("restore");
    assert_eq!(summary.tables["items"], 1);

    let items = orch.get_all("inventory", "items").await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "it1");
    assert_eq!(items[0].str_field("name"), Some("Mirror"));

    let listed = t.vault.backups.list_backups().await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "MalwaCRM_Inventory_backup.json");
}

#[tokio::test]
async fn missing_backup_file_is_typed_and_harmless() {
    let t = memory_vault().await;
    let orch = &t.vault.orchestrator;
    orch.put("jobs", "jobs", payload(json!({"id": "j1", "status": "open"})))
        .await
        .expect("put job");

    let err = t
        .vault
        .backups
        .restore_database("jobs")
        .await
        .expect_err("no backup yet");
    assert!(matches!(err, VaultError::BackupMissing { .. }));
    assert_eq!(orch.count("jobs", "jobs").await.expect("count"), 1);
}

#[tokio::test]
async fn malformed_backup_is_typed_and_harmless() {
    let t = memory_vault().await;
    let orch = &t.vault.orchestrator;
    orch.put("jobs", "jobs", payload(json!({"id": "j1", "status": "open"})))
        .await
        .expect("put job");

    let path = t.vault.backups.backup_path("jobs").expect("path");
    tokio::fs::create_dir_all(path.parent().expect("parent"))
        .await
        .expect("mkdir");
    tokio::fs::write(&path, "{ not json").await.expect("write junk");

    let err = t
        .vault
        .backups
        .restore_database("jobs")
        .await
        .expect_err("malformed backup");
    assert!(matches!(err, VaultError::RestoreParse { .. }));
    assert_eq!(orch.count("jobs", "jobs").await.expect("count"), 1);

    let err = t
        .vault
        .backups
        .restore_from_json("jobs", "[]")
        .await
        .expect_err("wrong shape");
    assert!(matches!(err, VaultError::RestoreParse { .. }));
}

#[tokio::test]
async fn failed_write_returns_error_and_logs_failed_history() {
    let fs = Arc::new(FlakyFs {
        inner: LocalFileSystem,
        fail_on: "Customers",
    });
    let t = vault_with_fs(StorageBackend::Memory, fs).await;

    let err = t
        .vault
        .backups
        .backup_database("customers")
        .await
        .expect_err("write refused");
    assert!(matches!(err, VaultError::BackupIo { .. }));
    assert!(err.to_string().contains("read-only"));

    let history = t.vault.backups.backup_history().await.expect("history");
    assert_eq!(history.len(), 1);
    let entry = &history[0];
    assert_eq!(entry.module, "customers");
    assert_eq!(entry.status, BackupStatus::Failed);
    assert_eq!(entry.kind, BackupKind::Manual);
    assert!(entry.id.starts_with("backup_"));
    assert!(entry.error_message.as_deref().is_some_and(|m| m.contains("read-only")));
}

#[tokio::test]
async fn backup_all_continues_past_a_failing_module() {
    let fs = Arc::new(FlakyFs {
        inner: LocalFileSystem,
        fail_on: "MalwaCRM_Sales",
    });
    let t = vault_with_fs(StorageBackend::Memory, fs).await;

    let outcomes = t.vault.backups.backup_all_databases().await;
    let modules = t.vault.orchestrator.catalog().databases().len();
    assert_eq!(outcomes.len(), modules);
    assert!(!outcomes["sales"].success);
    assert!(outcomes["sales"].error.is_some());
    assert_eq!(outcomes.values().filter(|o| o.success).count(), modules - 1);

    let history = t.vault.backups.backup_history().await.expect("history");
    assert_eq!(history.len(), modules);
    assert_eq!(
        history
            .iter()
            .filter(|h| h.status == BackupStatus::Failed)
            .count(),
        1
    );

    let restored = t.vault.backups.restore_all_databases().await;
    assert!(!restored["sales"].success);
    assert!(restored["customers"].success);
}

#[tokio::test]
async fn export_all_collects_every_module() {
    let t = memory_vault().await;
    let report = t.vault.orchestrator.export_all_databases().await;
    assert!(report.failures.is_empty());
    assert_eq!(
        report.manifests.len(),
        t.vault.orchestrator.catalog().databases().len()
    );
}

#[tokio::test(start_paused = true)]
async fn auto_backup_runs_on_schedule_and_stops_cleanly() {
    let fs = Arc::new(MemoryFs::default());
    let t = vault_with_fs(StorageBackend::Memory, fs.clone()).await;
    let backups = &t.vault.backups;
    let modules = t.vault.orchestrator.catalog().databases().len();

    assert!(backups.start_auto_backup(Duration::ZERO).is_err());
    backups
        .start_auto_backup(Duration::from_secs(3600))
        .expect("schedule");
    assert!(backups.is_auto_backup_running());

    tokio::time::sleep(Duration::from_secs(1800)).await;
    assert!(backups.backup_history().await.expect("history").is_empty());

    tokio::time::sleep(Duration::from_secs(1801)).await;
    let mut history = Vec::new();
    for _ in 0..100 {
        history = backups.backup_history().await.expect("history");
        if history.len() >= modules {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(history.len(), modules);
    assert!(history.iter().all(|h| h.kind == BackupKind::Auto));
    assert!(history.iter().all(|h| h.status == BackupStatus::Success));
    assert_eq!(fs.files.lock().unwrap().len(), modules);

    assert!(backups.stop_auto_backup());
    assert!(!backups.is_auto_backup_running());
    assert!(!backups.stop_auto_backup());

    tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
    assert_eq!(backups.backup_history().await.expect("history").len(), modules);
}
