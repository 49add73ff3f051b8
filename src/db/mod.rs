//! Database module: the key-value engine under every logical database.
//!
//! Layout:
//! - `models.rs`: the `Record` row shape and payload helpers
//! - `schema.rs`: the declarative `SchemaCatalog` of modules, tables and indexes
//! - `store.rs`: the `Storage` engine trait and the schema-checked `KeyValueStore`
//! - `sqlite.rs`: persistent engine (SQLite file per logical database)
//! - `memory.rs`: in-memory engine, also the degraded-mode fallback

pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use memory::InMemoryStore;
pub use models::{Payload, Record};
pub use schema::{DatabaseSchema, SchemaCatalog, TableSchema};
pub use sqlite::{SqlitePool, SqliteStore};
pub use store::{KeyValueStore, Storage};
