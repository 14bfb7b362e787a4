use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Column name to value mapping of a source row, passed through untouched.
pub type RowPayload = serde_json::Map<String, serde_json::Value>;

/// A single primary key column value.
///
/// Integer columns compare numerically, everything else compares as text by bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

/// Primary key values of a row, in the order of the table's primary key columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(Vec<KeyValue>);

impl PrimaryKey {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Renders the key as a JSON array, the form stored in artifacts and warehouses.
    pub fn to_json_string(&self) -> String {
        // A vector of integers and strings always serializes.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn from_json_str(value: &str) -> EtlResult<Self> {
        Ok(Self(serde_json::from_str(value)?))
    }

    /// Extracts the key columns from a payload.
    ///
    /// Fails with [`ErrorKind::InvalidData`] when a column is missing, null or neither an
    /// integer nor a string.
    pub fn from_payload(columns: &[String], payload: &RowPayload) -> EtlResult<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match payload.get(column) {
                Some(serde_json::Value::Number(number)) => match number.as_i64() {
                    Some(value) => KeyValue::Int(value),
                    None => KeyValue::Text(number.to_string()),
                },
                Some(serde_json::Value::String(value)) => KeyValue::Text(value.clone()),
                Some(serde_json::Value::Null) | None => bail!(
                    ErrorKind::InvalidData,
                    "Primary key column is missing",
                    format!("column `{column}` is absent or null")
                ),
                Some(other) => bail!(
                    ErrorKind::InvalidData,
                    "Primary key column has an unsupported type",
                    format!("column `{column}` holds `{other}`")
                ),
            };
            values.push(value);
        }

        Ok(Self(values))
    }
}

macro_rules! single_column_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PrimaryKey {
                fn from(value: $ty) -> Self {
                    PrimaryKey(vec![KeyValue::from(value)])
                }
            }
        )*
    };
}

single_column_key!(i64, &str, String);

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

/// Position of a change in the total order of changes of one source table.
///
/// `position` comes from the cursor value or the log position; equal positions are
/// ordered by primary key. The derived ordering compares `position` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingToken {
    pub position: i64,
    pub key: PrimaryKey,
}

impl OrderingToken {
    pub fn new(position: i64, key: PrimaryKey) -> Self {
        Self { position, key }
    }
}

impl fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.position, self.key)
    }
}

/// Kind of change.
///
/// Declared so that `Upsert < Delete`: among changes with the same token a delete sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Upsert,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Upsert => "upsert",
            ChangeOperation::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> EtlResult<Self> {
        match value {
            "upsert" => Ok(ChangeOperation::Upsert),
            "delete" => Ok(ChangeOperation::Delete),
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown change operation",
                format!("`{other}` is neither `upsert` nor `delete`")
            ),
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change read from a source table.
///
/// For [`ChangeOperation::Delete`] the payload may be partial or empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub key: PrimaryKey,
    pub payload: RowPayload,
    pub token: OrderingToken,
    /// When the source observed the change.
    pub source_timestamp: DateTime<Utc>,
    /// When the pipeline read the change.
    pub ingested_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an event whose token orders it at `position`, ingested now.
    pub fn new(
        operation: ChangeOperation,
        key: PrimaryKey,
        payload: RowPayload,
        position: i64,
        source_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation,
            token: OrderingToken::new(position, key.clone()),
            key,
            payload,
            source_timestamp,
            ingested_at: Utc::now(),
        }
    }

    pub fn upsert(key: impl Into<PrimaryKey>, payload: RowPayload, position: i64) -> Self {
        Self::new(
            ChangeOperation::Upsert,
            key.into(),
            payload,
            position,
            Utc::now(),
        )
    }

    pub fn delete(key: impl Into<PrimaryKey>, position: i64) -> Self {
        Self::new(
            ChangeOperation::Delete,
            key.into(),
            RowPayload::new(),
            position,
            Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokens_order_by_position_then_key() {
        let a = OrderingToken::new(10, PrimaryKey::from(2));
        let b = OrderingToken::new(10, PrimaryKey::from(11));
        let c = OrderingToken::new(11, PrimaryKey::from(1));

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn delete_sorts_after_upsert() {
        assert!(ChangeOperation::Upsert < ChangeOperation::Delete);
    }

    #[test]
    fn extracts_composite_keys_from_payloads() {
        let payload = json!({"tenant": 4, "code": "A-1", "name": "x"});
        let payload = payload.as_object().unwrap();

        let key = PrimaryKey::from_payload(&["tenant".into(), "code".into()], payload).unwrap();

        assert_eq!(key.to_json_string(), r#"[4,"A-1"]"#);
        assert_eq!(PrimaryKey::from_json_str(&key.to_json_string()).unwrap(), key);
    }

    #[test]
    fn null_key_columns_are_invalid() {
        let payload = json!({"id": null});

        let err = PrimaryKey::from_payload(&["id".into()], payload.as_object().unwrap())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
