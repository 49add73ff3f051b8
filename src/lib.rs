pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod platform;
pub mod service;
pub mod types;

pub use app::Vault;
pub use config::{Config, StorageBackend};
pub use error::VaultError;
