use crate::config::StorageBackend;
use crate::db::models::{Record, index_key_matches};
use crate::db::schema::DatabaseSchema;
use crate::db::store::Storage;
use crate::error::VaultError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type Tables = HashMap<String, BTreeMap<String, Record>>;

/// Non-persistent engine: one ordered map per table.
pub struct InMemoryStore {
    module: String,
    version: u32,
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new(schema: &DatabaseSchema) -> Self {
        let tables = schema
            .table_names()
            .map(|t| (t.to_string(), BTreeMap::new()))
            .collect();
        Self {
            module: schema.module.clone(),
            version: schema.version,
            tables: RwLock::new(tables),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn missing(&self, table: &str) -> VaultError {
        VaultError::UnknownTable {
            module: self.module.clone(),
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    fn version(&self) -> u32 {
        self.version
    }

    async fn table_names(&self) -> Result<Vec<String>, VaultError> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, VaultError> {
        let tables = self.read();
        let rows = tables.get(table).ok_or_else(|| self.missing(table))?;
        Ok(rows.get(id).cloned())
    }

    async fn get_all(&self, table: &str) -> Result<Vec<Record>, VaultError> {
        let tables = self.read();
        let rows = tables.get(table).ok_or_else(|| self.missing(table))?;
        Ok(rows.values().cloned().collect())
    }

    async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>, VaultError> {
        let tables = self.read();
        let rows = tables.get(table).ok_or_else(|| self.missing(table))?;
        Ok(rows
            .values()
            .filter(|r| {
                r.field(index)
                    .is_some_and(|stored| index_key_matches(&stored, value))
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), VaultError> {
        let mut tables = self.write();
        let rows = tables.get_mut(table).ok_or_else(|| self.missing(table))?;
        rows.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_many(&self, table: &str, records: &[Record]) -> Result<usize, VaultError> {
        let mut tables = self.write();
        let rows = tables.get_mut(table).ok_or_else(|| self.missing(table))?;
        for record in records {
            rows.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, VaultError> {
        let mut tables = self.write();
        let rows = tables.get_mut(table).ok_or_else(|| self.missing(table))?;
        Ok(rows.remove(id).is_some())
    }

    async fn clear(&self, table: &str) -> Result<(), VaultError> {
        let mut tables = self.write();
        let rows = tables.get_mut(table).ok_or_else(|| self.missing(table))?;
        rows.clear();
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, VaultError> {
        let tables = self.read();
        let rows = tables.get(table).ok_or_else(|| self.missing(table))?;
        Ok(rows.len() as u64)
    }

    async fn close(&self) {}
}
