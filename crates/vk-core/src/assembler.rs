//! # Frame Assembler
//!
//! Turns one push-query row into one columnar [`Frame`], naming each column
//! after the matching header entry.
//!
//! A text column named exactly [`DATETIME_COLUMN`] is parsed as an RFC 3339
//! timestamp and emitted as a time column. Values that cannot be parsed fall
//! back to the zero instant (the Unix epoch) instead of failing the row.

use crate::error::{DatasourceError, Result};
use crate::frame::{Field, FieldValues, Frame, FRAME_NAME};
use crate::value::{classify, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved column name carrying the event time of a row.
pub const DATETIME_COLUMN: &str = "DATETIME";

/// Column layout of a push query, announced once before any row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub query_id: Option<String>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Type name as declared by the engine, e.g. `BIGINT` or `ARRAY<STRING>`.
    pub type_name: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
        }
    }

    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
        }
    }

    /// Whether values of this column are event timestamps.
    pub fn is_temporal(&self) -> bool {
        self.name == DATETIME_COLUMN
    }
}

impl Header {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            query_id: None,
            columns,
        }
    }
}

/// One emitted row, positionally aligned with its [`Header`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

/// What to do with a value the classifier cannot map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Fail the row with [`DatasourceError::UnsupportedValueType`].
    #[default]
    Strict,
    /// Omit the column and log a warning.
    Lenient,
}

/// Build a single-row frame from `row`, using `header` for column names.
pub fn assemble(header: &Header, row: &Row, policy: TypePolicy) -> Result<Frame> {
    if header.columns.len() != row.0.len() {
        return Err(DatasourceError::ColumnCountMismatch {
            header: header.columns.len(),
            row: row.0.len(),
        });
    }

    let mut frame = Frame::new(FRAME_NAME);
    for (column, value) in header.columns.iter().zip(&row.0) {
        match to_field(column, value) {
            Ok(field) => frame.fields.push(field),
            Err(DatasourceError::UnsupportedValueType { kind, .. }) => match policy {
                TypePolicy::Strict => {
                    return Err(DatasourceError::UnsupportedValueType {
                        column: column.name.clone(),
                        kind,
                    })
                }
                TypePolicy::Lenient => {
                    tracing::warn!(
                        "Dropping column '{}': unsupported value type '{}'",
                        column.name,
                        kind
                    );
                }
            },
            Err(e) => return Err(e),
        }
    }

    Ok(frame)
}

fn to_field(column: &Column, value: &Value) -> Result<Field> {
    classify(value)?;

    let values = match value {
        Value::Text(s) if column.is_temporal() => FieldValues::Time(vec![parse_datetime(s)]),
        Value::Text(s) => FieldValues::Text(vec![s.clone()]),
        Value::Int8(v) => FieldValues::Int8(vec![*v]),
        Value::Int32(v) => FieldValues::Int32(vec![*v]),
        Value::Int64(v) => FieldValues::Int64(vec![*v]),
        Value::Float32(v) => FieldValues::Float32(vec![*v]),
        Value::Float64(v) => FieldValues::Float64(vec![*v]),
        Value::Bool(v) => FieldValues::Bool(vec![*v]),
        Value::Timestamp(t) => FieldValues::Time(vec![*t]),
        Value::Null | Value::Other(_) => {
            return Err(DatasourceError::UnsupportedValueType {
                column: column.name.clone(),
                kind: value.kind().to_string(),
            })
        }
    };

    Ok(Field::new(column.name.clone(), values))
}

/// Parse an RFC 3339 timestamp (fractional seconds allowed) into UTC.
pub fn parse_datetime(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!("Invalid {} value '{}': {}", DATETIME_COLUMN, raw, e);
            DateTime::<Utc>::default()
        }
    }
}
