use crate::config::StorageBackend;
use crate::db::models::Record;
use crate::db::schema::{DatabaseSchema, TableSchema};
use crate::db::store::Storage;
use crate::error::VaultError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SqlitePool = Pool<Sqlite>;

/// Persistent engine: one SQLite file per logical database.
///
/// Every table is `(id TEXT PRIMARY KEY, body TEXT)` with the full record as
/// JSON in `body`; secondary indexes are expression indexes over
/// `json_extract(body, '$.<field>')`. The logical version is `user_version`.
pub struct SqliteStore {
    database: String,
    path: PathBuf,
    version: u32,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database file, then bring its tables in line with
    /// `schema`.
    ///
    /// When declared tables are missing the handle is closed and reopened,
    /// and only the missing tables (with their indexes) are created under a
    /// bumped version. Existing tables are never altered.
    pub async fn open(data_dir: &Path, schema: &DatabaseSchema) -> Result<Self, VaultError> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            VaultError::StorageUnavailable(format!("{}: {e}", data_dir.display()))
        })?;
        let path = Self::file_path(data_dir, schema);

        let pool = connect_with_retry(&path).await?;
        let current = read_user_version(&pool).await.map_err(|e| unavailable(&path, e))?;
        let existing = list_tables(&pool).await.map_err(|e| unavailable(&path, e))?;
        let missing = schema.missing_tables(&existing);

        let fresh = current == 0 && existing.is_empty();
        let (pool, version) = if missing.is_empty() {
            let version = current.max(schema.version);
            if version != current {
                set_user_version(&pool, version)
                    .await
                    .map_err(|e| upgrade_failed(schema, e))?;
            }
            (pool, version)
        } else if fresh {
            let version = schema.version.max(1);
            create_tables(&pool, &missing, version)
                .await
                .map_err(|e| upgrade_failed(schema, e))?;
            info!(database = %schema.name, tables = missing.len(), "created logical database");
            (pool, version)
        } else {
            let names: Vec<&str> = missing.iter().map(|t| t.name.as_str()).collect();
            info!(
                database = %schema.name,
                missing = ?names,
                "missing tables detected, upgrading"
            );
            pool.close().await;
            let pool = connect_with_retry(&path).await?;
            let version = (current + 1).max(schema.version);
            create_tables(&pool, &missing, version)
                .await
                .map_err(|e| upgrade_failed(schema, e))?;
            info!(database = %schema.name, from = current, to = version, "logical database upgraded");
            (pool, version)
        };

        Ok(Self {
            database: schema.name.clone(),
            path,
            version,
            pool,
        })
    }

    /// File holding the logical database described by `schema`.
    pub fn file_path(data_dir: &Path, schema: &DatabaseSchema) -> PathBuf {
        data_dir.join(format!("{}.sqlite", schema.name))
    }

    /// Delete the database file with its WAL and shared-memory siblings.
    /// Files that do not exist are ignored.
    pub async fn remove_files(data_dir: &Path, schema: &DatabaseSchema) -> Result<(), VaultError> {
        let path = Self::file_path(data_dir, schema);
        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.clone().into_os_string();
            target.push(suffix);
            match tokio::fs::remove_file(&target).await {
                Ok(()) => debug!(path = ?target, "database file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_record(&self, row: SqliteRow) -> Result<Record, VaultError> {
        let body: String = row.try_get("body")?;
        Record::from_json(&body).inspect_err(|e| {
            warn!(database = %self.database, error = %e, "undecodable row");
        })
    }
}

#[async_trait]
impl Storage for SqliteStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    fn version(&self) -> u32 {
        self.version
    }

    async fn table_names(&self) -> Result<Vec<String>, VaultError> {
        Ok(list_tables(&self.pool).await?)
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, VaultError> {
        let sql = format!(r#"SELECT body FROM "{table}" WHERE id = ?"#);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.row_to_record(r)).transpose()
    }

    async fn get_all(&self, table: &str) -> Result<Vec<Record>, VaultError> {
        let sql = format!(r#"SELECT body FROM "{table}" ORDER BY id"#);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| self.row_to_record(r)).collect()
    }

    async fn get_by_index(
        &self,
        table: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>, VaultError> {
        let sql = format!(
            r#"SELECT body FROM "{table}" WHERE json_extract(body, '$.{index}') = ? ORDER BY id"#
        );
        let query = sqlx::query(&sql);
        let query = match value {
            Value::String(s) => query.bind(s.as_str()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::Bool(b) => query.bind(i64::from(*b)),
            // Null and composite values are never indexed.
            _ => return Ok(Vec::new()),
        };
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| self.row_to_record(r)).collect()
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), VaultError> {
        let sql = upsert_sql(table);
        sqlx::query(&sql)
            .bind(record.id.as_str())
            .bind(record.to_json()?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Batch upsert inside a single transaction.
    async fn upsert_many(&self, table: &str, records: &[Record]) -> Result<usize, VaultError> {
        let sql = upsert_sql(table);
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(&sql)
                .bind(record.id.as_str())
                .bind(record.to_json()?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, VaultError> {
        let sql = format!(r#"DELETE FROM "{table}" WHERE id = ?"#);
        let done = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn clear(&self, table: &str) -> Result<(), VaultError> {
        let sql = format!(r#"DELETE FROM "{table}""#);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, VaultError> {
        let sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn upsert_sql(table: &str) -> String {
    format!(
        r#"INSERT INTO "{table}" (id, body) VALUES (?, ?)
           ON CONFLICT(id) DO UPDATE SET body = excluded.body"#
    )
}

/// DDL for one table and its secondary indexes.
fn table_ddl(table: &TableSchema) -> Vec<String> {
    let name = &table.name;
    let mut stmts = vec![format!(
        r#"CREATE TABLE IF NOT EXISTS "{name}" (
            id TEXT PRIMARY KEY NOT NULL,
            body TEXT NOT NULL
        )"#
    )];
    stmts.extend(
        table
            .indexes
            .iter()
            .filter(|index| **index != table.key_path)
            .map(|index| {
                format!(
                    r#"CREATE INDEX IF NOT EXISTS "idx_{name}_{index}" ON "{name}" (json_extract(body, '$.{index}'))"#
                )
            }),
    );
    stmts
}

async fn connect_with_retry(path: &Path) -> Result<SqlitePool, VaultError> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let retry_policy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(2);

    (|| {
        let opts = opts.clone();
        async move {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(opts)
                .await
        }
    })
    .retry(retry_policy)
    .notify(|err: &sqlx::Error, dur: Duration| {
        warn!(path = %path.display(), "sqlite open retrying after error {}, sleeping {:?}", err, dur);
    })
    .await
    .map_err(|e| unavailable(path, e))
}

async fn read_user_version(pool: &SqlitePool) -> Result<u32, sqlx::Error> {
    let v: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(u32::try_from(v).unwrap_or_default())
}

async fn set_user_version(pool: &SqlitePool, version: u32) -> Result<(), sqlx::Error> {
    // PRAGMA does not accept bound parameters; `version` is an integer.
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(pool)
        .await?;
    Ok(())
}

async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
}

/// Create `tables` and stamp `version` in one transaction.
async fn create_tables(
    pool: &SqlitePool,
    tables: &[&TableSchema],
    version: u32,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for table in tables {
        for stmt in table_ddl(table) {
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
    }
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

fn unavailable(path: &Path, e: sqlx::Error) -> VaultError {
    VaultError::StorageUnavailable(format!("{}: {e}", path.display()))
}

fn upgrade_failed(schema: &DatabaseSchema, e: sqlx::Error) -> VaultError {
    VaultError::SchemaUpgrade {
        database: schema.name.clone(),
        reason: e.to_string(),
    }
}
