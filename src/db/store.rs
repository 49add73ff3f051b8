use crate::config::StorageBackend;
use crate::db::memory::InMemoryStore;
use crate::db::models::{Payload, Record};
use crate::db::schema::DatabaseSchema;
use crate::db::sqlite::SqliteStore;
use crate::error::VaultError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Engine behind one logical database.
///
/// Implementations only move records; table/index validation and metadata
/// stamping live in [`KeyValueStore`] so every engine behaves the same.
#[async_trait]
pub trait Storage: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Version of the logical database as currently opened.
    fn version(&self) -> u32;

    async fn table_names(&self) -> Result<Vec<String>, VaultError>;

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, VaultError>;

    /// All records ordered by primary key.
    async fn get_all(&self, table: &str) -> Result<Vec<Record>, VaultError>;

    async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>, VaultError>;

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), VaultError>;

    /// Write many records in one engine transaction.
    async fn upsert_many(&self, table: &str, records: &[Record]) -> Result<usize, VaultError>;

    async fn delete(&self, table: &str, id: &str) -> Result<bool, VaultError>;

    async fn clear(&self, table: &str) -> Result<(), VaultError>;

    async fn count(&self, table: &str) -> Result<u64, VaultError>;

    async fn close(&self);
}

/// One opened logical database: schema-checked CRUD over a [`Storage`].
pub struct KeyValueStore {
    schema: DatabaseSchema,
    engine: Arc<dyn Storage>,
    degraded: bool,
}

impl KeyValueStore {
    /// Open (creating or upgrading) the logical database described by `schema`.
    ///
    /// With the SQLite backend an unusable engine is not fatal: the store
    /// falls back to an in-memory table map and reports degraded mode. A
    /// failed schema upgrade is fatal for this database.
    pub async fn open(
        backend: StorageBackend,
        data_dir: &Path,
        schema: &DatabaseSchema,
    ) -> Result<Self, VaultError> {
        let (engine, degraded): (Arc<dyn Storage>, bool) = match backend {
            StorageBackend::Memory => (Arc::new(InMemoryStore::new(schema)), false),
            StorageBackend::Sqlite => match SqliteStore::open(data_dir, schema).await {
                Ok(store) => (Arc::new(store), false),
                Err(VaultError::StorageUnavailable(reason)) => {
                    warn!(
                        database = %schema.name,
                        reason = %reason,
                        "storage engine unavailable; using in-memory fallback (data will not persist)"
                    );
                    (Arc::new(InMemoryStore::new(schema)), true)
                }
                Err(e) => return Err(e),
            },
        };
        info!(
            database = %schema.name,
            version = engine.version(),
            backend = ?engine.backend(),
            degraded,
            "logical database opened"
        );
        Ok(Self {
            schema: schema.clone(),
            engine,
            degraded,
        })
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn version(&self) -> u32 {
        self.engine.version()
    }

    pub fn backend(&self) -> StorageBackend {
        self.engine.backend()
    }

    /// True when the in-memory fallback replaced an unavailable engine.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub async fn existing_tables(&self) -> Result<Vec<String>, VaultError> {
        self.engine.table_names().await
    }

    /// Stamp and upsert. Keeps the stored `created_at` when the payload
    /// omits it and the id already exists.
    pub async fn put(&self, table: &str, payload: Payload) -> Result<Record, VaultError> {
        self.schema.table(table)?;
        let existing_created_at = match Record::supplied_id(&payload) {
            Some(id) => self.engine.get(table, &id).await?.map(|r| r.created_at),
            None => None,
        };
        let record = Record::stamp(payload, existing_created_at);
        self.engine.upsert(table, &record).await?;
        debug!(database = %self.schema.name, table, id = %record.id, "record stored");
        Ok(record)
    }

    /// Stamp and upsert a batch.
    pub async fn put_many(
        &self,
        table: &str,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Record>, VaultError> {
        self.schema.table(table)?;
        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let existing_created_at = match Record::supplied_id(&payload) {
                Some(id) => self.engine.get(table, &id).await?.map(|r| r.created_at),
                None => None,
            };
            records.push(Record::stamp(payload, existing_created_at));
        }
        self.engine.upsert_many(table, &records).await?;
        Ok(records)
    }

    /// Write records exactly as given, metadata included.
    pub async fn restore_records(&self, table: &str, records: &[Record]) -> Result<usize, VaultError> {
        self.schema.table(table)?;
        self.engine.upsert_many(table, records).await
    }

    pub async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, VaultError> {
        self.schema.table(table)?;
        self.engine.get(table, id).await
    }

    pub async fn get_all(&self, table: &str) -> Result<Vec<Record>, VaultError> {
        self.schema.table(table)?;
        self.engine.get_all(table).await
    }

    pub async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>, VaultError> {
        let declared = self.schema.table(table)?;
        if !declared.has_index(index) {
            return Err(VaultError::UnknownIndex {
                table: table.to_string(),
                index: index.to_string(),
            });
        }
        if index == declared.key_path {
            let id = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Ok(Vec::new()),
            };
            return Ok(self.engine.get(table, &id).await?.into_iter().collect());
        }
        self.engine.get_by_index(table, index, value).await
    }

    pub async fn delete(&self, table: &str, id: &str) -> Result<bool, VaultError> {
        self.schema.table(table)?;
        self.engine.delete(table, id).await
    }

    pub async fn clear(&self, table: &str) -> Result<(), VaultError> {
        self.schema.table(table)?;
        self.engine.clear(table).await
    }

    pub async fn count(&self, table: &str) -> Result<u64, VaultError> {
        self.schema.table(table)?;
        self.engine.count(table).await
    }

    pub async fn close(&self) {
        self.engine.close().await;
    }
}
