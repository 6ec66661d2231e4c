//! Record and value types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tenant identifier. All tables and records are namespaced by tenant.
pub type TenantId = i32;

/// Record timestamp in milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Column name to value mapping. Order is irrelevant.
pub type ValueMap = HashMap<String, Value>;

/// A typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    /// Whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen integral values to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

/// A schemaless, timestamped, tenant-scoped record.
///
/// Identity is `(tenant_id, table_name, id)`. A record is immutable once
/// built; the store only encodes and decodes its value map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    tenant_id: TenantId,
    table_name: String,
    timestamp: TimestampMs,
    values: ValueMap,
}

impl Record {
    /// Create a record with an explicit identifier.
    pub fn new(
        id: impl Into<String>,
        tenant_id: TenantId,
        table_name: impl Into<String>,
        values: ValueMap,
        timestamp: TimestampMs,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id,
            table_name: table_name.into(),
            timestamp,
            values,
        }
    }

    /// Create a record with a freshly generated, time-sortable identifier.
    pub fn with_generated_id(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        values: ValueMap,
        timestamp: TimestampMs,
    ) -> Self {
        Self::new(generate_record_id(), tenant_id, table_name, values, timestamp)
    }

    /// Create a record with a generated identifier stamped with the current time.
    pub fn now(tenant_id: TenantId, table_name: impl Into<String>, values: ValueMap) -> Self {
        Self::with_generated_id(tenant_id, table_name, values, current_time_millis())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    /// Look up a single column value.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Consume the record, returning its value map.
    pub fn into_values(self) -> ValueMap {
        self.values
    }
}

/// Generate a new record identifier (UUIDv7, hyphen-free).
pub fn generate_record_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Current wall-clock time in milliseconds.
pub fn current_time_millis() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let mut values = ValueMap::new();
        values.insert("name".to_string(), Value::from("alpha"));
        values.insert("count".to_string(), Value::from(3_i64));

        let record = Record::new("r1", 4, "events", values, 1_000);
        assert_eq!(record.id(), "r1");
        assert_eq!(record.tenant_id(), 4);
        assert_eq!(record.table_name(), "events");
        assert_eq!(record.timestamp(), 1_000);
        assert_eq!(record.value("name").and_then(Value::as_str), Some("alpha"));
        assert_eq!(record.value("count").and_then(Value::as_i64), Some(3));
        assert!(record.value("missing").is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Record::now(1, "t", ValueMap::new());
        let b = Record::now(1, "t", ValueMap::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 32);
    }

    #[test]
    fn test_value_serde_keeps_type_tag() {
        let json = serde_json::to_string(&Value::Int(5)).expect("serialize");
        assert_eq!(json, r#"{"type":"int","value":5}"#);
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Value::Int(5));

        let null: Value = serde_json::from_str(r#"{"type":"null"}"#).expect("deserialize");
        assert!(null.is_null());
    }
}
