#![allow(dead_code)]

use crm_vault::db::models::Payload;
use crm_vault::db::schema::SchemaCatalog;
use crm_vault::platform::{FileSystem, LocalFileSystem, ManualNetworkStatus};
use crm_vault::{Config, StorageBackend, Vault};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    }
}

pub fn temp_config(backend: StorageBackend) -> (TempDir, Config) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let cfg = Config::rooted(dir.path(), backend);
    (dir, cfg)
}

pub struct TestVault {
    pub dir: TempDir,
    pub config: Config,
    pub network: Arc<ManualNetworkStatus>,
    pub vault: Vault,
}

pub async fn vault_with_fs(backend: StorageBackend, fs: Arc<dyn FileSystem>) -> TestVault {
    let (dir, config) = temp_config(backend);
    let network = Arc::new(ManualNetworkStatus::new(true));
    let vault = Vault::start(&config, SchemaCatalog::standard(), fs, network.clone())
        .await
        .expect("start vault");
    TestVault {
        dir,
        config,
        network,
        vault,
    }
}

pub async fn memory_vault() -> TestVault {
    vault_with_fs(StorageBackend::Memory, Arc::new(LocalFileSystem)).await
}
