//! Typed attribute values.
//!
//! # Responsibility
//! - Represent one attribute value independent of storage encoding.
//! - Convert to and from decoded JSON values.
//!
//! # Invariants
//! - `AttrValue::Null` is the only value without a kind.
//! - JSON arrays and objects have no attribute representation.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter};

/// Declared kind of an entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKind {
    Integer,
    Real,
    Text,
    Bool,
}

impl AttrKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Bool => "bool",
        }
    }
}

impl Display for AttrKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl AttrValue {
    /// Kind of this value; `None` for `Null`.
    pub fn kind(&self) -> Option<AttrKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(AttrKind::Bool),
            Self::Integer(_) => Some(AttrKind::Integer),
            Self::Real(_) => Some(AttrKind::Real),
            Self::Text(_) => Some(AttrKind::Text),
        }
    }

    /// Short name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or("null", AttrKind::as_str)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a decoded JSON scalar.
    ///
    /// Returns `None` for arrays and objects, and for numbers that fit
    /// neither `i64` nor `f64`.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Self::Null),
            JsonValue::Bool(flag) => Some(Self::Bool(*flag)),
            JsonValue::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Real)),
            JsonValue::String(text) => Some(Self::Text(text.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    /// Encodes this value as JSON. Non-finite reals encode as `null`;
    /// `FieldInfo::coerce` keeps them out of stored attributes.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(flag) => JsonValue::Bool(*flag),
            Self::Integer(number) => JsonValue::from(*number),
            Self::Real(number) => serde_json::Number::from_f64(*number)
                .map_or(JsonValue::Null, JsonValue::Number),
            Self::Text(text) => JsonValue::String(text.clone()),
        }
    }
}

/// Kind name of a decoded JSON value, for error messages.
pub fn json_kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(number) if number.is_i64() || number.is_u64() => "integer",
        JsonValue::Number(_) => "real",
        JsonValue::String(_) => "text",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(number) => write!(f, "{number}"),
            Self::Real(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "`{text}`"),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i16> for AttrValue {
    fn from(value: i16) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
