use crate::error::VaultError;
use crate::platform::fs::FileSystem;
use crate::types::ledger::LedgerEntry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const CSV_HEADER: &str = "Date,Doc No,Type,Reference,Notes,Debit,Credit,Balance";

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

/// Header plus one fully quoted row per entry; amounts use two decimals.
pub fn to_csv(entries: &[LedgerEntry]) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for e in entries {
        let cells = [
            e.date.format("%Y-%m-%d").to_string(),
            e.doc_no.clone(),
            e.doc_type.to_string(),
            e.reference.clone(),
            e.notes.clone(),
            format!("{:.2}", e.debit),
            format!("{:.2}", e.credit),
            format!("{:.2}", e.balance),
        ];
        lines.push(
            cells
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}

/// Writes ledger CSVs under `<exports_root>/Ledger/<entity>/`.
pub struct LedgerExporter {
    fs: Arc<dyn FileSystem>,
    exports_root: PathBuf,
}

impl LedgerExporter {
    pub fn new(fs: Arc<dyn FileSystem>, exports_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            exports_root: exports_root.into(),
        }
    }

    pub fn exports_root(&self) -> &Path {
        &self.exports_root
    }

    /// `Ledger_<first date>_to_<last date>.csv`, with `start`/`end` for an
    /// empty ledger.
    pub fn csv_path(&self, entity: &str, entries: &[LedgerEntry]) -> PathBuf {
        let from = entries
            .first()
            .map_or_else(|| "start".to_string(), |e| e.date.to_string());
        let to = entries
            .last()
            .map_or_else(|| "end".to_string(), |e| e.date.to_string());
        self.exports_root
            .join("Ledger")
            .join(folder_name(entity))
            .join(format!("Ledger_{from}_to_{to}.csv"))
    }

    pub async fn export_csv(
        &self,
        entity: &str,
        entries: &[LedgerEntry],
    ) -> Result<PathBuf, VaultError> {
        let path = self.csv_path(entity, entries);
        let written = self.fs.write_file(&path, &to_csv(entries)).await?;
        info!(entity, rows = entries.len(), path = %written.display(), "ledger exported");
        Ok(written)
    }
}

/// Entity names become a single path component.
fn folder_name(entity: &str) -> String {
    let cleaned: String = entity
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "unknown".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_strips_separators() {
        assert_eq!(folder_name("A/B\\C"), "A_B_C");
        assert_eq!(folder_name(".."), "unknown");
        assert_eq!(folder_name("  Ravi Motors "), "Ravi Motors");
    }

    #[test]
    fn quote_doubles_embedded_quotes() {
        assert_eq!(quote(r#"6" pipe"#), r#""6"" pipe""#);
    }
}
