//! Raw input records.

use crate::model::value::json_kind_name;
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Attribute-name to value mapping as received from an external source.
pub type RawRecord = Map<String, JsonValue>;

/// Decoded JSON that is not a list of objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordShapeError {
    NotAnArray { found: &'static str },
    NotAnObject { index: usize, found: &'static str },
}

impl Display for RecordShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnArray { found } => write!(f, "expected a JSON array, got {found}"),
            Self::NotAnObject { index, found } => {
                write!(f, "expected a JSON object at index {index}, got {found}")
            }
        }
    }
}

impl Error for RecordShapeError {}

/// Splits a decoded JSON array of objects into records, keeping order.
pub fn records_from_json(value: JsonValue) -> Result<Vec<RawRecord>, RecordShapeError> {
    let items = match value {
        JsonValue::Array(items) => items,
        other => {
            return Err(RecordShapeError::NotAnArray {
                found: json_kind_name(&other),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            JsonValue::Object(record) => Ok(record),
            other => Err(RecordShapeError::NotAnObject {
                index,
                found: json_kind_name(&other),
            }),
        })
        .collect()
}
