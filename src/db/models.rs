use crate::error::VaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Open payload carried by a record next to its fixed metadata.
pub type Payload = Map<String, Value>;

/// One stored row: `{id, ...payload, created_at, updated_at}`.
///
/// Decoding is lenient (see the `TryFrom<Payload>` impl) so rows written by
/// older clients still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Payload")]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Build a record from caller data, stamping metadata.
    ///
    /// A caller-supplied `id` (string or number) is kept, otherwise a v4 uuid
    /// is generated. `created_at` falls back to `existing_created_at`, then to
    /// now. `updated_at` is always now, clamped so it never precedes
    /// `created_at`.
    pub fn stamp(mut payload: Payload, existing_created_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        let id = match payload.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let created_at = payload
            .remove("created_at")
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or(existing_created_at)
            .unwrap_or(now);
        payload.remove("updated_at");

        Self {
            id,
            payload,
            created_at,
            updated_at: now.max(created_at),
        }
    }

    /// Peek at the id a payload would be stored under, if it carries one.
    pub fn supplied_id(payload: &Payload) -> Option<String> {
        match payload.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Field lookup that also covers the metadata columns.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "created_at" => serde_json::to_value(self.created_at).ok(),
            "updated_at" => serde_json::to_value(self.updated_at).ok(),
            other => self.payload.get(other).cloned(),
        }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Numeric field, accepting numbers stored as strings.
    pub fn f64_field(&self, name: &str) -> Option<f64> {
        match self.payload.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, VaultError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(body: &str) -> Result<Self, VaultError> {
        serde_json::from_str(body).map_err(|e| VaultError::InvalidRecord(e.to_string()))
    }

    pub fn into_value(self) -> Result<Value, VaultError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Reads a stored timestamp: RFC 3339 text or epoch milliseconds.
fn parse_timestamp(value: Option<Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Decodes a stored or restored row.
///
/// A numeric id becomes its decimal text. Timestamps that are present are
/// kept as they are; a missing `created_at` takes `updated_at`, then now, and
/// a missing `updated_at` takes `created_at`.
impl TryFrom<Payload> for Record {
    type Error = String;

    fn try_from(mut payload: Payload) -> Result<Self, Self::Error> {
        let id = match payload.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(format!("record id must be a string or number, got {other}")),
            None => return Err("record without an id".to_string()),
        };
        let created = parse_timestamp(payload.remove("created_at"));
        let updated = parse_timestamp(payload.remove("updated_at"));
        let created_at = created.or(updated).unwrap_or_else(Utc::now);
        Ok(Self {
            id,
            payload,
            created_at,
            updated_at: updated.unwrap_or(created_at),
        })
    }
}

/// Equality used by secondary-index lookups: numbers compare by value so an
/// integer `1` and a float `1.0` hit the same index key.
pub fn index_key_matches(stored: &Value, wanted: &Value) -> bool {
    match (stored, wanted) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Turn an arbitrary JSON value into a payload map.
pub fn payload_from_value(value: Value) -> Result<Payload, VaultError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(VaultError::InvalidRecord(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}
