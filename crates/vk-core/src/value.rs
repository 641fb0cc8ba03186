//! # Row values and the Row Classifier
//!
//! Every cell of a push-query row is decoded into a [`Value`]. The
//! classifier maps a value onto the columnar [`FieldType`] it will be
//! stored as; anything without a scalar mapping is reported instead of
//! being dropped.

use crate::error::{DatasourceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single dynamically-typed cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    /// An already-parsed instant. The ksqlDB decoder keeps `TIMESTAMP`
    /// cells as text; this is for callers that build rows themselves.
    Timestamp(DateTime<Utc>),
    Null,
    /// Arrays, maps, structs and anything else with no columnar mapping.
    Other(serde_json::Value),
}

/// Columnar value types a [`Field`](crate::frame::Field) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Int8,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Time,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Int8 => write!(f, "int8"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::Bool => write!(f, "bool"),
            Self::Time => write!(f, "time"),
        }
    }
}

impl Value {
    /// Human-readable name of the dynamic type, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int8(_) => "int8",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::Timestamp(_) => "timestamp",
            Self::Null => "null",
            Self::Other(serde_json::Value::Array(_)) => "array",
            Self::Other(serde_json::Value::Object(_)) => "object",
            Self::Other(_) => "other",
        }
    }

    /// Decode one JSON cell emitted by ksqlDB.
    ///
    /// `declared` is the column type from the stream header (`INTEGER`,
    /// `DECIMAL(10, 2)`, `ARRAY<STRING>`, ...). A value that does not fit its
    /// declared type is decoded from its JSON shape alone instead of being
    /// truncated.
    pub fn from_json(raw: &serde_json::Value, declared: Option<&str>) -> Self {
        use serde_json::Value as Json;

        if raw.is_null() {
            return Self::Null;
        }

        let base = declared.map(base_type).unwrap_or_default();
        match (base.as_str(), raw) {
            ("INTEGER" | "INT", Json::Number(n)) => {
                if let Some(v) = n.as_i64().and_then(|v| i32::try_from(v).ok()) {
                    return Self::Int32(v);
                }
            }
            ("BIGINT", Json::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    return Self::Int64(v);
                }
            }
            ("DOUBLE" | "DECIMAL", Json::Number(n)) => {
                if let Some(v) = n.as_f64() {
                    return Self::Float64(v);
                }
            }
            ("ARRAY" | "MAP" | "STRUCT" | "BYTES", other) => return Self::Other(other.clone()),
            _ => {}
        }

        Self::from_untyped_json(raw)
    }

    fn from_untyped_json(raw: &serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match raw {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::String(s) => Self::Text(s.clone()),
            Json::Number(n) => match n.as_i64() {
                Some(v) => Self::Int64(v),
                None => Self::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            other => Self::Other(other.clone()),
        }
    }
}

/// Strip parameters from a ksqlDB type name: `DECIMAL(4, 2)` -> `DECIMAL`.
fn base_type(declared: &str) -> String {
    let end = declared.find(['(', '<']).unwrap_or(declared.len());
    declared[..end].trim().to_uppercase()
}

/// Select the columnar type a row value is stored as.
pub fn classify(value: &Value) -> Result<FieldType> {
    match value {
        Value::Text(_) => Ok(FieldType::Text),
        Value::Int8(_) => Ok(FieldType::Int8),
        Value::Int32(_) => Ok(FieldType::Int32),
        Value::Int64(_) => Ok(FieldType::Int64),
        Value::Float32(_) => Ok(FieldType::Float32),
        Value::Float64(_) => Ok(FieldType::Float64),
        Value::Bool(_) => Ok(FieldType::Bool),
        Value::Timestamp(_) => Ok(FieldType::Time),
        Value::Null | Value::Other(_) => Err(DatasourceError::UnsupportedValueType {
            column: String::new(),
            kind: value.kind().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_scalars() {
        assert_eq!(classify(&Value::Text("a".into())).unwrap(), FieldType::Text);
        assert_eq!(classify(&Value::Int8(-3)).unwrap(), FieldType::Int8);
        assert_eq!(classify(&Value::Int32(7)).unwrap(), FieldType::Int32);
        assert_eq!(classify(&Value::Int64(1 << 40)).unwrap(), FieldType::Int64);
        assert_eq!(classify(&Value::Float32(1.5)).unwrap(), FieldType::Float32);
        assert_eq!(classify(&Value::Float64(2.5)).unwrap(), FieldType::Float64);
        assert_eq!(classify(&Value::Bool(true)).unwrap(), FieldType::Bool);
        assert_eq!(
            classify(&Value::Timestamp(DateTime::<Utc>::default())).unwrap(),
            FieldType::Time
        );
    }

    #[test]
    fn test_classify_rejects_composites() {
        let err = classify(&Value::Other(json!([1, 2]))).unwrap_err();
        match err {
            DatasourceError::UnsupportedValueType { kind, .. } => assert_eq!(kind, "array"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(classify(&Value::Null).is_err());
    }

    #[test]
    fn test_from_json_uses_declared_type() {
        assert_eq!(Value::from_json(&json!(42), Some("INTEGER")), Value::Int32(42));
        assert_eq!(Value::from_json(&json!(42), Some("BIGINT")), Value::Int64(42));
        assert_eq!(Value::from_json(&json!(42), Some("DOUBLE")), Value::Float64(42.0));
        assert_eq!(
            Value::from_json(&json!(12.34), Some("DECIMAL(4, 2)")),
            Value::Float64(12.34)
        );
        assert_eq!(
            Value::from_json(&json!("x"), Some("STRING")),
            Value::Text("x".into())
        );
        assert_eq!(
            Value::from_json(&json!(["a"]), Some("ARRAY<STRING>")),
            Value::Other(json!(["a"]))
        );
    }

    #[test]
    fn test_from_json_overflowing_integer_is_not_truncated() {
        let big = 1_i64 << 40;
        assert_eq!(Value::from_json(&json!(big), Some("INTEGER")), Value::Int64(big));
    }

    #[test]
    fn test_from_json_without_declared_type() {
        assert_eq!(Value::from_json(&json!(true), None), Value::Bool(true));
        assert_eq!(Value::from_json(&json!(-9), None), Value::Int64(-9));
        assert_eq!(Value::from_json(&json!(0.25), None), Value::Float64(0.25));
        assert_eq!(Value::from_json(&json!(null), Some("BIGINT")), Value::Null);
        assert_eq!(
            Value::from_json(&json!({"k": 1}), None),
            Value::Other(json!({"k": 1}))
        );
    }
}
