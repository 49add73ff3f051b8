//! Ledger module: per-entity statements built from stored documents.
//!
//! Layout:
//! - `engine.rs`: loads invoices, receipts and adjustments into `LedgerEntry` rows
//! - `report.rs`: running balance, aging, KPIs, filtering and totals (pure)
//! - `export.rs`: CSV rendering and the `LedgerExporter`

pub mod engine;
pub mod export;
pub mod report;

pub use engine::{LedgerEngine, LedgerSource, LedgerSources};
pub use export::{LedgerExporter, to_csv};
pub use report::{
    compute_aging, compute_kpis, compute_running_balance, filter_entries, sort_entries, summarize,
};
