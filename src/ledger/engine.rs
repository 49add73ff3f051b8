use crate::db::models::Record;
use crate::error::VaultError;
use crate::ledger::report::{
    compute_aging, compute_kpis, compute_running_balance, sort_entries, summarize,
};
use crate::service::orchestrator::DatabaseOrchestrator;
use crate::types::ledger::{DocType, LedgerEntry, LedgerStatement};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where one kind of ledger document lives and which index names its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSource {
    pub module: String,
    pub table: String,
    pub entity_index: String,
}

impl LedgerSource {
    pub fn new(module: &str, table: &str, entity_index: &str) -> Self {
        Self {
            module: module.to_string(),
            table: table.to_string(),
            entity_index: entity_index.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSources {
    pub invoices: LedgerSource,
    pub receipts: LedgerSource,
    /// Returns and adjustments; `None` skips this source.
    pub adjustments: Option<LedgerSource>,
}

impl Default for LedgerSources {
    fn default() -> Self {
        Self {
            invoices: LedgerSource::new("sales", "invoices", "customer_id"),
            receipts: LedgerSource::new("ledger", "cash_receipts", "customer_id"),
            adjustments: Some(LedgerSource::new("ledger", "ledger_entries", "entity_id")),
        }
    }
}

/// Builds per-entity ledgers from stored transaction records.
pub struct LedgerEngine {
    orchestrator: Arc<DatabaseOrchestrator>,
    sources: LedgerSources,
}

impl LedgerEngine {
    pub fn new(orchestrator: Arc<DatabaseOrchestrator>) -> Self {
        Self::with_sources(orchestrator, LedgerSources::default())
    }

    pub fn with_sources(orchestrator: Arc<DatabaseOrchestrator>, sources: LedgerSources) -> Self {
        Self {
            orchestrator,
            sources,
        }
    }

    pub fn sources(&self) -> &LedgerSources {
        &self.sources
    }

    /// Every document for `entity_key`, sorted by date with running balances.
    ///
    /// Documents sharing a date stay in sequence: invoices, then receipts,
    /// then adjustments, each in creation order. Records whose date cannot be
    /// parsed are skipped.
    pub async fn load_entries(&self, entity_key: &str) -> Result<Vec<LedgerEntry>, VaultError> {
        let keys = entity_keys(entity_key);
        let mut entries = Vec::new();

        for record in self.fetch(&self.sources.invoices, &keys).await? {
            entries.extend(invoice_entry(&record));
        }
        for record in self.fetch(&self.sources.receipts, &keys).await? {
            entries.extend(receipt_entry(&record));
        }
        if let Some(source) = &self.sources.adjustments {
            for record in self.fetch(source, &keys).await? {
                entries.extend(adjustment_entry(&record));
            }
        }

        sort_entries(&mut entries);
        compute_running_balance(&mut entries);
        debug!(entity = entity_key, entries = entries.len(), "ledger loaded");
        Ok(entries)
    }

    /// Records of one source matching any of `keys`, oldest first.
    async fn fetch(&self, source: &LedgerSource, keys: &[Value]) -> Result<Vec<Record>, VaultError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for key in keys {
            let hits = self
                .orchestrator
                .get_by_index(&source.module, &source.table, &source.entity_index, key)
                .await?;
            records.extend(hits.into_iter().filter(|r| seen.insert(r.id.clone())));
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Entries, KPIs, aging and totals for one entity as of `as_of`.
    pub async fn statement(
        &self,
        entity_key: &str,
        as_of: NaiveDate,
    ) -> Result<LedgerStatement, VaultError> {
        let entries = self.load_entries(entity_key).await?;
        Ok(LedgerStatement {
            entity: entity_key.to_string(),
            as_of,
            kpis: compute_kpis(&entries, as_of),
            aging: compute_aging(&entries, as_of),
            summary: summarize(&entries),
            entries,
        })
    }
}

/// Index keys an entity may be stored under: the text itself and, when it
/// reads as an integer, the number too.
fn entity_keys(entity_key: &str) -> Vec<Value> {
    let mut keys = vec![Value::String(entity_key.to_string())];
    if let Ok(n) = entity_key.trim().parse::<i64>() {
        keys.push(Value::from(n));
    }
    keys
}

/// Accepts `YYYY-MM-DD`, RFC 3339, or anything starting with a plain date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
        .or_else(|| {
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

fn record_date(record: &Record, fields: &[&str]) -> Option<NaiveDate> {
    let date = fields
        .iter()
        .find_map(|f| record.str_field(f))
        .and_then(parse_date);
    if date.is_none() {
        warn!(id = %record.id, "ledger document without a usable date; skipped");
    }
    date
}

fn text(record: &Record, fields: &[&str]) -> String {
    fields
        .iter()
        .find_map(|f| record.str_field(f))
        .unwrap_or_default()
        .to_string()
}

fn first_amount(record: &Record, fields: &[&str]) -> Option<f64> {
    fields.iter().find_map(|f| record.f64_field(f))
}

fn build_entry(
    record: &Record,
    prefix: &str,
    date: NaiveDate,
    doc_no: String,
    doc_type: DocType,
    net: f64,
) -> Option<LedgerEntry> {
    if net == 0.0 {
        return None;
    }
    Some(LedgerEntry {
        id: format!("{prefix}-{}", record.id),
        date,
        doc_no,
        doc_type,
        reference: String::new(),
        notes: text(record, &["notes"]),
        debit: net.max(0.0),
        credit: (-net).max(0.0),
        balance: 0.0,
    })
}

fn invoice_entry(record: &Record) -> Option<LedgerEntry> {
    let date = record_date(record, &["date", "invoice_date"])?;
    let amount = first_amount(record, &["total_amount", "totalAmount", "amount"]).unwrap_or(0.0);
    let doc_no = record
        .str_field("invoice_no")
        .map(str::to_string)
        .unwrap_or_else(|| format!("INV-{}", record.id));
    let mut entry = build_entry(record, "invoice", date, doc_no, DocType::Invoice, amount)?;
    entry.reference = text(record, &["reference", "vehicle_no"]);
    Some(entry)
}

fn receipt_entry(record: &Record) -> Option<LedgerEntry> {
    let date = record_date(record, &["date"])?;
    let amount = first_amount(record, &["amount"]).unwrap_or(0.0);
    let doc_no = record
        .str_field("receipt_no")
        .map(str::to_string)
        .unwrap_or_else(|| format!("RCT-{}", record.id));
    let mut entry = build_entry(record, "receipt", date, doc_no, DocType::Receipt, -amount)?;
    entry.reference = text(record, &["purpose", "reference"]);
    entry.notes = text(record, &["payment_type", "method", "notes"]);
    Some(entry)
}

/// Only `Return` and `Adjustment` rows are taken from the general ledger
/// table; invoices and receipts come from their own sources.
fn adjustment_entry(record: &Record) -> Option<LedgerEntry> {
    let doc_type = ["doc_type", "type"]
        .iter()
        .find_map(|f| record.str_field(f))
        .and_then(DocType::parse)
        .filter(|t| matches!(t, DocType::Return | DocType::Adjustment))?;
    let date = record_date(record, &["date"])?;

    let debit = record.f64_field("debit");
    let credit = record.f64_field("credit");
    let net = if debit.is_some() || credit.is_some() {
        debit.unwrap_or(0.0) - credit.unwrap_or(0.0)
    } else {
        let amount = record.f64_field("amount").unwrap_or(0.0);
        match doc_type {
            DocType::Return => -amount.abs(),
            _ => amount,
        }
    };
    let doc_no = record
        .str_field("doc_no")
        .map(str::to_string)
        .unwrap_or_else(|| {
            let prefix = if doc_type == DocType::Return { "RET" } else { "ADJ" };
            format!("{prefix}-{}", record.id)
        });
    let mut entry = build_entry(record, "ledger", date, doc_no, doc_type, net)?;
    entry.reference = text(record, &["reference", "description"]);
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 4);
        assert_eq!(parse_date("2025-03-04"), expected);
        assert_eq!(parse_date("2025-03-04T10:00:00Z"), expected);
        assert_eq!(parse_date("2025-03-04 10:00"), expected);
        assert_eq!(parse_date("04/03/2025"), None);
    }

    #[test]
    fn integer_keys_also_match_numbers() {
        assert_eq!(entity_keys("c1"), vec![Value::from("c1")]);
        assert_eq!(entity_keys("7"), vec![Value::from("7"), Value::from(7)]);
    }
}
