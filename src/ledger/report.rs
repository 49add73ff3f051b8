//! Pure computations over already-normalized ledger entries.

use crate::types::ledger::{
    AgingReport, DocType, LedgerEntry, LedgerFilter, LedgerKpis, LedgerSummary, Payment,
};
use chrono::{Days, NaiveDate};

/// Days after its date an invoice becomes overdue.
pub const PAYMENT_TERM_DAYS: u64 = 30;

/// Stable sort by date; equal dates keep the order they were given in.
pub fn sort_entries(entries: &mut [LedgerEntry]) {
    entries.sort_by_key(|e| e.date);
}

/// `balance[i] = balance[i-1] + debit[i] - credit[i]`, starting from zero.
pub fn compute_running_balance(entries: &mut [LedgerEntry]) {
    let mut balance = 0.0;
    for entry in entries.iter_mut() {
        balance += entry.debit - entry.credit;
        entry.balance = balance;
    }
}

fn bucket_index(days: i64) -> usize {
    match days {
        ..=30 => 0,
        31..=60 => 1,
        61..=90 => 2,
        91..=120 => 3,
        _ => 4,
    }
}

/// Buckets every Invoice whose point-in-time balance is positive by its age
/// at `as_of`, summing the invoice's gross debit.
pub fn compute_aging(entries: &[LedgerEntry], as_of: NaiveDate) -> AgingReport {
    let mut report = AgingReport::empty();
    for entry in entries
        .iter()
        .filter(|e| e.doc_type == DocType::Invoice && e.balance > 0.0)
    {
        let days = (as_of - entry.date).num_days();
        let bucket = &mut report.buckets[bucket_index(days)];
        bucket.amount += entry.debit;
        bucket.count += 1;
    }
    report
}

fn is_overdue(entry: &LedgerEntry, today: NaiveDate) -> bool {
    entry
        .date
        .checked_add_days(Days::new(PAYMENT_TERM_DAYS))
        .is_some_and(|due| due < today)
}

pub fn compute_kpis(entries: &[LedgerEntry], today: NaiveDate) -> LedgerKpis {
    let current_outstanding = entries.last().map_or(0.0, |e| e.balance);

    let overdue_amount = entries
        .iter()
        .filter(|e| e.doc_type == DocType::Invoice && e.balance > 0.0 && is_overdue(e, today))
        .map(|e| e.debit)
        .sum();

    let receipts: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| e.doc_type == DocType::Receipt)
        .collect();
    let last_payment = receipts.last().map(|r| Payment {
        date: r.date,
        amount: r.credit,
    });

    // first receipt strictly after each invoice; no amount matching
    let gaps: Vec<i64> = entries
        .iter()
        .filter(|e| e.doc_type == DocType::Invoice)
        .filter_map(|inv| {
            receipts
                .iter()
                .find(|r| r.date > inv.date)
                .map(|r| (r.date - inv.date).num_days())
        })
        .collect();
    let avg_payment_days = if gaps.is_empty() {
        0
    } else {
        (gaps.iter().sum::<i64>() as f64 / gaps.len() as f64).round() as i64
    };

    LedgerKpis {
        opening_balance: 0.0,
        current_outstanding,
        overdue_amount,
        last_payment,
        avg_payment_days,
    }
}

pub fn filter_entries(entries: &[LedgerEntry], filter: &LedgerFilter) -> Vec<LedgerEntry> {
    entries.iter().filter(|e| filter.matches(e)).cloned().collect()
}

pub fn summarize(entries: &[LedgerEntry]) -> LedgerSummary {
    let period_debit: f64 = entries.iter().map(|e| e.debit).sum();
    let period_credit: f64 = entries.iter().map(|e| e.credit).sum();
    LedgerSummary {
        period_debit,
        period_credit,
        net_amount: period_debit - period_credit,
        closing_balance: entries.last().map_or(0.0, |e| e.balance),
    }
}
