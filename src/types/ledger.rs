use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    Invoice,
    Receipt,
    Return,
    Adjustment,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Invoice => "Invoice",
            DocType::Receipt => "Receipt",
            DocType::Return => "Return",
            DocType::Adjustment => "Adjustment",
        }
    }

    /// Case-insensitive parse of a stored document type.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invoice" => Some(DocType::Invoice),
            "receipt" => Some(DocType::Receipt),
            "return" => Some(DocType::Return),
            "adjustment" => Some(DocType::Adjustment),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived ledger row; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub date: NaiveDate,
    pub doc_no: String,
    pub doc_type: DocType,
    pub reference: String,
    pub notes: String,
    pub debit: f64,
    pub credit: f64,
    pub balance: f64,
}

impl LedgerEntry {
    pub fn amount(&self) -> f64 {
        self.debit + self.credit
    }
}

pub const AGING_LABELS: [&str; 5] = ["0-30", "31-60", "61-90", "91-120", "120+"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingBucket {
    pub label: &'static str,
    pub amount: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingReport {
    pub buckets: Vec<AgingBucket>,
}

impl AgingReport {
    pub fn empty() -> Self {
        Self {
            buckets: AGING_LABELS
                .iter()
                .map(|&label| AgingBucket {
                    label,
                    amount: 0.0,
                    count: 0,
                })
                .collect(),
        }
    }

    pub fn bucket(&self, label: &str) -> Option<&AgingBucket> {
        self.buckets.iter().find(|b| b.label == label)
    }

    pub fn total(&self) -> f64 {
        self.buckets.iter().map(|b| b.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerKpis {
    pub opening_balance: f64,
    pub current_outstanding: f64,
    pub overdue_amount: f64,
    pub last_payment: Option<Payment>,
    pub avg_payment_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub period_debit: f64,
    pub period_credit: f64,
    pub net_amount: f64,
    pub closing_balance: f64,
}

/// Predicate over computed entries; `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub doc_type: Option<DocType>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        let amount = entry.amount();
        self.date_from.is_none_or(|from| entry.date >= from)
            && self.date_to.is_none_or(|to| entry.date <= to)
            && self.doc_type.is_none_or(|t| entry.doc_type == t)
            && self.amount_min.is_none_or(|min| amount >= min)
            && self.amount_max.is_none_or(|max| amount <= max)
    }
}

/// Everything a statement view needs for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatement {
    pub entity: String,
    pub as_of: NaiveDate,
    pub entries: Vec<LedgerEntry>,
    pub kpis: LedgerKpis,
    pub aging: AgingReport,
    pub summary: LedgerSummary,
}
