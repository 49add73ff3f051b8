use crate::config::{Config, StorageBackend};
use crate::db::models::{Payload, Record};
use crate::db::schema::{SYNC_QUEUE_TABLE, SYSTEM_MODULE, SchemaCatalog};
use crate::db::sqlite::SqliteStore;
use crate::db::store::KeyValueStore;
use crate::error::VaultError;
use crate::service::sync_queue::MutationQueue;
use crate::types::backup::{BackupManifest, ExportReport, ImportSummary, ModuleStats, TableStats};
use crate::types::queue::SyncAction;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Owns one [`KeyValueStore`] per catalog module and routes CRUD,
/// export, import and statistics by `(module, table)`.
pub struct DatabaseOrchestrator {
    catalog: SchemaCatalog,
    backend: StorageBackend,
    data_dir: PathBuf,
    stores: HashMap<String, Mutex<StoreCell>>,
    sync_queue: RwLock<Option<MutationQueue>>,
}

/// Lazily opened store of one module; swapped for a fresh cell on delete.
type StoreCell = Arc<OnceCell<Arc<KeyValueStore>>>;

fn lock(slot: &Mutex<StoreCell>) -> MutexGuard<'_, StoreCell> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

impl DatabaseOrchestrator {
    pub fn new(config: &Config, catalog: SchemaCatalog) -> Self {
        let stores = catalog
            .modules()
            .map(|m| (m.to_string(), Mutex::default()))
            .collect();
        Self {
            catalog,
            backend: config.storage_backend,
            data_dir: config.data_dir(),
            stores,
            sync_queue: RwLock::new(None),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Route every later mutation intent into `queue`, replacing the queue
    /// attached before. Returns true when one was replaced.
    pub fn attach_sync_queue(&self, queue: MutationQueue) -> bool {
        self.sync_queue
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(queue)
            .is_some()
    }

    pub fn sync_queue(&self) -> Option<MutationQueue> {
        self.sync_queue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cell(&self, module: &str) -> Result<StoreCell, VaultError> {
        self.stores
            .get(module)
            .map(|slot| lock(slot).clone())
            .ok_or_else(|| VaultError::UnknownModule(module.to_string()))
    }

    /// Opened store for `module`, opening it on first use.
    ///
    /// Concurrent callers share one in-flight open; a failed open leaves the
    /// cell empty so a later call retries.
    pub async fn database(&self, module: &str) -> Result<Arc<KeyValueStore>, VaultError> {
        let cell = self.cell(module)?;
        let schema = self.catalog.database(module)?;
        let store = cell
            .get_or_try_init(|| async {
                KeyValueStore::open(self.backend, &self.data_dir, schema)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(store.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.stores.values().all(|slot| lock(slot).initialized())
    }

    /// Open every module in the catalog. A no-op once all are open.
    ///
    /// Modules open concurrently; one module's failure does not stop the
    /// others, and the first failure is returned.
    pub async fn initialize_all(&self) -> Result<(), VaultError> {
        if self.is_initialized() {
            return Ok(());
        }
        info!(modules = self.stores.len(), "initializing logical databases");

        let results = join_all(
            self.catalog
                .modules()
                .map(|module| async move { (module, self.database(module).await) }),
        )
        .await;

        let mut first_err = None;
        for (module, result) in results {
            if let Err(e) = result {
                error!(module, error = %e, "module initialization failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!("all logical databases initialized");
                Ok(())
            }
        }
    }

    /// Close every opened store.
    pub async fn close_all(&self) {
        let cells: Vec<StoreCell> = self.stores.values().map(|slot| lock(slot).clone()).collect();
        for cell in cells {
            if let Some(store) = cell.get() {
                store.close().await;
            }
        }
    }

    /// Drop every logical database: opened stores are closed, SQLite files
    /// are removed and in-memory tables are discarded.
    ///
    /// Afterwards no module counts as initialized and the next access or
    /// [`Self::initialize_all`] creates each database from the catalog. Store
    /// handles taken out earlier stay closed.
    pub async fn delete_all_databases(&self) -> Result<(), VaultError> {
        warn!(modules = self.stores.len(), "deleting all logical databases");
        for schema in self.catalog.databases() {
            let Some(slot) = self.stores.get(&schema.module) else {
                continue;
            };
            let previous = std::mem::take(&mut *lock(slot));
            if let Some(store) = previous.get() {
                store.close().await;
            }
            if self.backend == StorageBackend::Sqlite {
                SqliteStore::remove_files(&self.data_dir, schema).await?;
            }
            info!(database = %schema.name, "logical database deleted");
        }
        info!("all logical databases deleted");
        Ok(())
    }

    /// Empty every table of every module, keeping the databases themselves.
    pub async fn clear_local_data(&self) -> Result<(), VaultError> {
        warn!("clearing all local data");
        for schema in self.catalog.databases() {
            let store = self.database(&schema.module).await?;
            for table in schema.table_names() {
                store.clear(table).await?;
            }
        }
        info!("local data cleared");
        Ok(())
    }

    // ---- CRUD -------------------------------------------------------------

    /// Insert a record and record a `create` intent.
    pub async fn create(
        &self,
        module: &str,
        table: &str,
        payload: Payload,
    ) -> Result<Record, VaultError> {
        let record = self.database(module).await?.put(table, payload).await?;
        self.record_mutation(SyncAction::Create, module, table, record_value(&record))
            .await;
        Ok(record)
    }

    /// Upsert a record and record an `update` intent.
    pub async fn put(
        &self,
        module: &str,
        table: &str,
        payload: Payload,
    ) -> Result<Record, VaultError> {
        let record = self.database(module).await?.put(table, payload).await?;
        self.record_mutation(SyncAction::Update, module, table, record_value(&record))
            .await;
        Ok(record)
    }

    /// Merge `changes` into an existing record.
    pub async fn update(
        &self,
        module: &str,
        table: &str,
        id: &str,
        changes: Payload,
    ) -> Result<Record, VaultError> {
        let store = self.database(module).await?;
        let existing = store
            .get(table, id)
            .await?
            .ok_or_else(|| VaultError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        let mut merged = existing.payload;
        merged.extend(changes);
        merged.remove("created_at");
        merged.insert("id".to_string(), Value::String(id.to_string()));

        let record = store.put(table, merged).await?;
        self.record_mutation(SyncAction::Update, module, table, record_value(&record))
            .await;
        Ok(record)
    }

    pub async fn delete(&self, module: &str, table: &str, id: &str) -> Result<bool, VaultError> {
        let removed = self.database(module).await?.delete(table, id).await?;
        self.record_mutation(SyncAction::Delete, module, table, json!({ "id": id }))
            .await;
        Ok(removed)
    }

    /// Insert many records, one `create` intent each.
    pub async fn bulk_put(
        &self,
        module: &str,
        table: &str,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Record>, VaultError> {
        let records = self.database(module).await?.put_many(table, payloads).await?;
        for record in &records {
            self.record_mutation(SyncAction::Create, module, table, record_value(record))
                .await;
        }
        Ok(records)
    }

    /// Write without recording a mutation intent (internal bookkeeping).
    pub(crate) async fn put_local(
        &self,
        module: &str,
        table: &str,
        payload: Payload,
    ) -> Result<Record, VaultError> {
        self.database(module).await?.put(table, payload).await
    }

    pub async fn get_by_id(
        &self,
        module: &str,
        table: &str,
        id: &str,
    ) -> Result<Option<Record>, VaultError> {
        self.database(module).await?.get(table, id).await
    }

    pub async fn get_all(&self, module: &str, table: &str) -> Result<Vec<Record>, VaultError> {
        self.database(module).await?.get_all(table).await
    }

    pub async fn get_by_index(
        &self,
        module: &str,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>, VaultError> {
        self.database(module)
            .await?
            .get_by_index(table, index, value)
            .await
    }

    /// All records of a table matching `predicate`.
    pub async fn query<F>(
        &self,
        module: &str,
        table: &str,
        predicate: F,
    ) -> Result<Vec<Record>, VaultError>
    where
        F: Fn(&Record) -> bool,
    {
        let mut records = self.get_all(module, table).await?;
        records.retain(|r| predicate(r));
        Ok(records)
    }

    pub async fn count(&self, module: &str, table: &str) -> Result<u64, VaultError> {
        self.database(module).await?.count(table).await
    }

    pub async fn clear(&self, module: &str, table: &str) -> Result<(), VaultError> {
        self.database(module).await?.clear(table).await
    }

    async fn record_mutation(&self, action: SyncAction, module: &str, table: &str, payload: Value) {
        if module == SYSTEM_MODULE && table == SYNC_QUEUE_TABLE {
            return;
        }
        let Some(queue) = self.sync_queue() else {
            debug!(module, table, ?action, "no sync queue attached; intent not recorded");
            return;
        };
        if let Err(e) = queue.add_to_sync_queue(action, module, table, payload).await {
            warn!(module, table, ?action, error = %e, "failed to record mutation intent");
        }
    }

    // ---- export / import --------------------------------------------------

    /// Snapshot every table of `module`.
    pub async fn export_database(&self, module: &str) -> Result<BackupManifest, VaultError> {
        let schema = self.catalog.database(module)?;
        let store = self.database(module).await?;

        let mut stores = BTreeMap::new();
        for table in schema.table_names() {
            stores.insert(table.to_string(), store.get_all(table).await?);
        }
        let manifest = BackupManifest {
            module: module.to_string(),
            database: schema.name.clone(),
            version: store.version(),
            export_date: Utc::now(),
            stores,
        };
        debug!(module, records = manifest.record_count(), "database exported");
        Ok(manifest)
    }

    /// Export each module independently; failures are collected, not fatal.
    pub async fn export_all_databases(&self) -> ExportReport {
        let mut report = ExportReport::default();
        for module in self.catalog.modules() {
            match self.export_database(module).await {
                Ok(manifest) => {
                    info!(module, "exported database");
                    report.manifests.insert(module.to_string(), manifest);
                }
                Err(e) => {
                    error!(module, error = %e, "failed to export database");
                    report.failures.insert(module.to_string(), e.to_string());
                }
            }
        }
        report
    }

    /// Replace the contents of every table named in `manifest`.
    ///
    /// Destructive: each named table is cleared before its records are
    /// written back verbatim. The manifest is validated in full first, so a
    /// mismatched module or unknown table leaves all data untouched.
    pub async fn import_database(
        &self,
        module: &str,
        manifest: &BackupManifest,
    ) -> Result<ImportSummary, VaultError> {
        if manifest.module != module {
            return Err(VaultError::ManifestMismatch {
                expected: module.to_string(),
                found: manifest.module.clone(),
            });
        }
        let schema = self.catalog.database(module)?;
        for table in manifest.stores.keys() {
            schema.table(table)?;
        }

        let store = self.database(module).await?;
        info!(module, tables = manifest.stores.len(), "importing database");
        let mut summary = ImportSummary {
            module: module.to_string(),
            ..ImportSummary::default()
        };
        for (table, records) in &manifest.stores {
            store.clear(table).await?;
            let written = store.restore_records(table, records).await?;
            info!(module, table = %table, records = written, "table imported");
            summary.tables.insert(table.clone(), written);
        }
        Ok(summary)
    }

    /// Record count and approximate JSON size per table. A table (or module)
    /// that cannot be read reports its error instead of failing the call.
    pub async fn get_statistics(&self) -> BTreeMap<String, ModuleStats> {
        let mut stats = BTreeMap::new();
        for schema in self.catalog.databases() {
            let mut module_stats = ModuleStats {
                database: schema.name.clone(),
                stores: BTreeMap::new(),
            };
            let store = self.database(&schema.module).await;
            for table in schema.table_names() {
                let table_stats = match &store {
                    Ok(store) => match store.get_all(table).await {
                        Ok(records) => TableStats {
                            count: records.len() as u64,
                            size: serde_json::to_string(&records)
                                .map(|s| s.len() as u64)
                                .unwrap_or_default(),
                            error: None,
                        },
                        Err(e) => {
                            warn!(module = %schema.module, table, error = %e, "statistics unavailable");
                            TableStats {
                                error: Some(e.to_string()),
                                ..TableStats::default()
                            }
                        }
                    },
                    Err(e) => TableStats {
                        error: Some(e.to_string()),
                        ..TableStats::default()
                    },
                };
                module_stats.stores.insert(table.to_string(), table_stats);
            }
            stats.insert(schema.module.clone(), module_stats);
        }
        stats
    }
}

fn record_value(record: &Record) -> Value {
    serde_json::to_value(record).unwrap_or_else(|_| json!({ "id": record.id }))
}
