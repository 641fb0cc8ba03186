//! # Columnar frames
//!
//! The unit of output handed to the dashboard host. A frame holds one named,
//! type-homogeneous column per header entry. Push queries produce frames of
//! exactly one row each.

use crate::value::FieldType;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Name given to every frame produced from a push-query row.
pub const FRAME_NAME: &str = "response";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub values: FieldValues,
}

/// Column storage, one vector variant per [`FieldType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldValues {
    Text(Vec<String>),
    Int8(Vec<i8>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Time(Vec<DateTime<Utc>>),
}

impl FieldValues {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text(_) => FieldType::Text,
            Self::Int8(_) => FieldType::Int8,
            Self::Int32(_) => FieldType::Int32,
            Self::Int64(_) => FieldType::Int64,
            Self::Float32(_) => FieldType::Float32,
            Self::Float64(_) => FieldType::Float64,
            Self::Bool(_) => FieldType::Bool,
            Self::Time(_) => FieldType::Time,
        }
    }
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.values.field_type()
    }
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}
