//! Declarative catalog of logical databases, their tables and indexes.
//!
//! Each business module owns one independently versioned logical database.
//! Upgrades are additive: a table present in the catalog but missing on disk
//! is created on open, nothing is ever dropped.

use crate::error::VaultError;
use tracing::info;

pub const SYNC_QUEUE_TABLE: &str = "sync_queue";
pub const BACKUP_HISTORY_TABLE: &str = "backup_history";
pub const SYSTEM_MODULE: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub key_path: String,
    pub indexes: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, indexes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_path: "id".to_string(),
            indexes: indexes.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_index(&self, index: &str) -> bool {
        index == self.key_path || self.indexes.iter().any(|i| i == index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSchema {
    pub module: String,
    pub name: String,
    pub version: u32,
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    fn new(module: &str, name: &str, tables: Vec<TableSchema>) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            version: 1,
            tables,
        }
    }

    pub fn table(&self, table: &str) -> Result<&TableSchema, VaultError> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| VaultError::UnknownTable {
                module: self.module.clone(),
                table: table.to_string(),
            })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Declared tables absent from `existing`, in catalog order.
    pub fn missing_tables<'a>(&'a self, existing: &[String]) -> Vec<&'a TableSchema> {
        self.tables
            .iter()
            .filter(|t| !existing.iter().any(|e| e == &t.name))
            .collect()
    }
}

/// Ordered set of logical databases, one per business module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCatalog {
    databases: Vec<DatabaseSchema>,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl SchemaCatalog {
    pub fn new(databases: Vec<DatabaseSchema>) -> Result<Self, VaultError> {
        for db in &databases {
            for table in &db.tables {
                for ident in std::iter::once(&table.name)
                    .chain(std::iter::once(&table.key_path))
                    .chain(table.indexes.iter())
                {
                    if !is_safe_ident(ident) {
                        return Err(VaultError::InvalidRecord(format!(
                            "catalog identifier {ident:?} in {}",
                            db.name
                        )));
                    }
                }
            }
        }
        Ok(Self { databases })
    }

    pub fn standard() -> Self {
        let t = TableSchema::new;
        Self {
            databases: vec![
                DatabaseSchema::new(
                    "customers",
                    "MalwaCRM_Customers",
                    vec![
                        t("customers", &["name", "phone", "email", "created_at", "updated_at"]),
                        t("contacts", &["customer_id", "name", "phone"]),
                        t("addresses", &["customer_id", "type"]),
                        t("vehicles", &["customer_id", "vehicle_no", "model"]),
                    ],
                ),
                DatabaseSchema::new(
                    "sales",
                    "MalwaCRM_Sales",
                    vec![
                        t("invoices", &["customer_id", "invoice_no", "date", "status", "total_amount"]),
                        t("estimates", &["customer_id", "estimate_no", "date", "status"]),
                        t("chalans", &["customer_id", "chalan_no", "date"]),
                        t("payments", &["customer_id", "invoice_id", "date", "amount", "method"]),
                    ],
                ),
                DatabaseSchema::new(
                    "inventory",
                    "MalwaCRM_Inventory",
                    vec![
                        t("items", &["name", "sku", "category", "quantity", "price"]),
                        t("categories", &["name", "parent_id"]),
                        t("stock_movements", &["item_id", "type", "date", "quantity"]),
                        t("suppliers", &["name", "phone", "email"]),
                    ],
                ),
                DatabaseSchema::new(
                    "jobs",
                    "MalwaCRM_Jobs",
                    vec![
                        t("jobs", &["customer_id", "vehicle_no", "status", "created_at"]),
                        t("inspections", &["job_id", "date", "status"]),
                        t("job_sheets", &["job_id", "date"]),
                        t("job_parts", &["job_id", "item_id", "quantity"]),
                        t("job_labour", &["job_id", "labour_id", "hours"]),
                    ],
                ),
                DatabaseSchema::new(
                    "employees",
                    "MalwaCRM_Employees",
                    vec![
                        t("employees", &["name", "role", "phone", "email", "status"]),
                        t("labour", &["name", "phone", "skill_type", "rate"]),
                        t("attendance", &["employee_id", "date", "status"]),
                        t("payroll", &["employee_id", "month", "year", "amount"]),
                    ],
                ),
                DatabaseSchema::new(
                    "vendors",
                    "MalwaCRM_Vendors",
                    vec![
                        t("vendors", &["name", "phone", "email", "type"]),
                        t("purchases", &["vendor_id", "purchase_no", "date", "amount"]),
                        t("vendor_payments", &["vendor_id", "date", "amount", "method"]),
                    ],
                ),
                DatabaseSchema::new(
                    "ledger",
                    "MalwaCRM_Ledger",
                    vec![
                        t("ledger_entries", &["entity_type", "entity_id", "date", "type", "amount"]),
                        t("cash_receipts", &["customer_id", "date", "amount"]),
                        t("vouchers", &["type", "date", "amount"]),
                        t("gst_records", &["invoice_id", "date", "gst_amount"]),
                    ],
                ),
                DatabaseSchema::new(
                    "reports",
                    "MalwaCRM_Reports",
                    vec![
                        t("saved_reports", &["type", "date", "created_by"]),
                        t("report_templates", &["name", "type"]),
                        t("export_history", &["date", "type", "format"]),
                    ],
                ),
                DatabaseSchema::new(
                    "settings",
                    "MalwaCRM_Settings",
                    vec![
                        t("companies", &["name"]),
                        t("users", &["email", "username", "role"]),
                        t("app_settings", &["key", "category"]),
                        t("multipliers", &["category", "name"]),
                        t("branches", &["name", "code"]),
                    ],
                ),
                DatabaseSchema::new(
                    SYSTEM_MODULE,
                    "MalwaCRM_System",
                    vec![
                        t(SYNC_QUEUE_TABLE, &["status", "timestamp", "action"]),
                        t(BACKUP_HISTORY_TABLE, &["date", "status", "type"]),
                        t("audit_logs", &["user_id", "action", "timestamp", "entity_type"]),
                        t("sessions", &["user_id", "created_at", "expires_at"]),
                    ],
                ),
            ],
        }
    }

    pub fn databases(&self) -> &[DatabaseSchema] {
        &self.databases
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.databases.iter().map(|d| d.module.as_str())
    }

    pub fn database(&self, module: &str) -> Result<&DatabaseSchema, VaultError> {
        self.databases
            .iter()
            .find(|d| d.module == module)
            .ok_or_else(|| VaultError::UnknownModule(module.to_string()))
    }

    /// Add a table to a module's declaration (replacing one of the same name).
    pub fn with_table(mut self, module: &str, table: TableSchema) -> Result<Self, VaultError> {
        if !is_safe_ident(&table.name) || !table.indexes.iter().all(|i| is_safe_ident(i)) {
            return Err(VaultError::InvalidRecord(format!(
                "catalog identifier in table {:?}",
                table.name
            )));
        }
        let db = self
            .databases
            .iter_mut()
            .find(|d| d.module == module)
            .ok_or_else(|| VaultError::UnknownModule(module.to_string()))?;
        db.tables.retain(|t| t.name != table.name);
        db.tables.push(table);
        Ok(self)
    }

    /// Drop a table from a module's declaration. Stored data is untouched.
    pub fn without_table(mut self, module: &str, table: &str) -> Result<Self, VaultError> {
        let db = self
            .databases
            .iter_mut()
            .find(|d| d.module == module)
            .ok_or_else(|| VaultError::UnknownModule(module.to_string()))?;
        db.tables.retain(|t| t.name != table);
        Ok(self)
    }

    /// Log the catalog layout at info level.
    pub fn describe(&self) {
        for db in &self.databases {
            info!(module = %db.module, database = %db.name, version = db.version, "logical database");
            for table in &db.tables {
                info!(
                    database = %db.name,
                    table = %table.name,
                    key = %table.key_path,
                    indexes = %table.indexes.join(", "),
                    "  table"
                );
            }
        }
    }
}

/// Identifiers end up inside SQL text, so only `[A-Za-z0-9_]` is accepted.
pub fn is_safe_ident(ident: &str) -> bool {
    !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
