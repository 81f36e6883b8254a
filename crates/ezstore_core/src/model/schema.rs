//! Declared entity schemas.
//!
//! # Responsibility
//! - Map attribute names to typed getter/setter functions, built once per
//!   entity type.
//! - Coerce incoming values to the declared attribute kind.
//! - Encode entities to and decode them from attribute maps.
//!
//! # Invariants
//! - Attribute names are identifiers (`[A-Za-z_][A-Za-z0-9_]*`) and unique.
//! - The identity attribute, when declared, is a non-nullable field.
//! - Values handed to setters are already coerced to the field kind.

use crate::model::value::{json_kind_name, AttrKind, AttrValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static ATTRIBUTE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid attribute name regex")
});

type Getter<E> = Box<dyn Fn(&E) -> AttrValue + Send + Sync>;
type Setter<E> = Box<dyn Fn(&mut E, AttrValue) -> Result<(), FieldError> + Send + Sync>;

/// Failure to read or assign one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    UnknownField {
        entity: &'static str,
        field: String,
    },
    KindMismatch {
        field: String,
        expected: AttrKind,
        found: &'static str,
    },
    NullNotAllowed {
        field: String,
    },
    OutOfRange {
        field: String,
        value: AttrValue,
    },
}

impl FieldError {
    /// Name of the attribute the error refers to.
    pub fn field(&self) -> &str {
        match self {
            Self::UnknownField { field, .. }
            | Self::KindMismatch { field, .. }
            | Self::NullNotAllowed { field }
            | Self::OutOfRange { field, .. } => field,
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity, field } => {
                write!(f, "entity `{entity}` has no attribute `{field}`")
            }
            Self::KindMismatch {
                field,
                expected,
                found,
            } => write!(f, "attribute `{field}` expects {expected}, got {found}"),
            Self::NullNotAllowed { field } => write!(f, "attribute `{field}` cannot be null"),
            Self::OutOfRange { field, value } => {
                write!(f, "value {value} is out of range for attribute `{field}`")
            }
        }
    }
}

impl Error for FieldError {}

/// Invalid schema declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName(String),
    DuplicateField(&'static str),
    UnknownIdentity(&'static str),
    NullableIdentity(&'static str),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid entity or attribute name: `{name}`"),
            Self::DuplicateField(name) => write!(f, "attribute declared twice: `{name}`"),
            Self::UnknownIdentity(name) => {
                write!(f, "identity attribute `{name}` is not a declared field")
            }
            Self::NullableIdentity(name) => {
                write!(f, "identity attribute `{name}` must not be nullable")
            }
        }
    }
}

impl Error for SchemaError {}

/// Rust types usable as entity attributes.
pub trait FieldType: Sized {
    const KIND: AttrKind;
    const NULLABLE: bool = false;

    fn into_value(self) -> AttrValue;

    /// Converts a value already coerced to `KIND` (or `Null` when nullable).
    /// Returns `None` when the value does not fit the Rust type.
    fn from_value(value: AttrValue) -> Option<Self>;
}

impl FieldType for i64 {
    const KIND: AttrKind = AttrKind::Integer;

    fn into_value(self) -> AttrValue {
        AttrValue::Integer(self)
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        match value {
            AttrValue::Integer(number) => Some(number),
            _ => None,
        }
    }
}

impl FieldType for i32 {
    const KIND: AttrKind = AttrKind::Integer;

    fn into_value(self) -> AttrValue {
        AttrValue::Integer(i64::from(self))
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        i64::from_value(value).and_then(|number| i32::try_from(number).ok())
    }
}

impl FieldType for i16 {
    const KIND: AttrKind = AttrKind::Integer;

    fn into_value(self) -> AttrValue {
        AttrValue::Integer(i64::from(self))
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        i64::from_value(value).and_then(|number| i16::try_from(number).ok())
    }
}

impl FieldType for f64 {
    const KIND: AttrKind = AttrKind::Real;

    fn into_value(self) -> AttrValue {
        AttrValue::Real(self)
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        match value {
            AttrValue::Real(number) => Some(number),
            _ => None,
        }
    }
}

impl FieldType for bool {
    const KIND: AttrKind = AttrKind::Bool;

    fn into_value(self) -> AttrValue {
        AttrValue::Bool(self)
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        match value {
            AttrValue::Bool(flag) => Some(flag),
            _ => None,
        }
    }
}

impl FieldType for String {
    const KIND: AttrKind = AttrKind::Text;

    fn into_value(self) -> AttrValue {
        AttrValue::Text(self)
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        match value {
            AttrValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: AttrKind = T::KIND;
    const NULLABLE: bool = true;

    fn into_value(self) -> AttrValue {
        self.map_or(AttrValue::Null, T::into_value)
    }

    fn from_value(value: AttrValue) -> Option<Self> {
        match value {
            AttrValue::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Public description of one declared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: &'static str,
    pub kind: AttrKind,
    pub nullable: bool,
}

impl FieldInfo {
    /// Coerces `value` to this field's kind.
    ///
    /// Integers widen to reals; nothing else converts. Non-finite reals are
    /// out of range because JSON storage cannot hold them.
    pub fn coerce(&self, value: &AttrValue) -> Result<AttrValue, FieldError> {
        match (self.kind, value) {
            (_, AttrValue::Null) if self.nullable => Ok(AttrValue::Null),
            (_, AttrValue::Null) => Err(FieldError::NullNotAllowed {
                field: self.name.to_string(),
            }),
            (AttrKind::Real, AttrValue::Real(number)) if !number.is_finite() => {
                Err(FieldError::OutOfRange {
                    field: self.name.to_string(),
                    value: value.clone(),
                })
            }
            (AttrKind::Integer, AttrValue::Integer(_))
            | (AttrKind::Real, AttrValue::Real(_))
            | (AttrKind::Text, AttrValue::Text(_))
            | (AttrKind::Bool, AttrValue::Bool(_)) => Ok(value.clone()),
            (AttrKind::Real, AttrValue::Integer(number)) => Ok(AttrValue::Real(*number as f64)),
            (expected, other) => Err(FieldError::KindMismatch {
                field: self.name.to_string(),
                expected,
                found: other.kind_name(),
            }),
        }
    }

    /// Coerces a decoded JSON value to this field's kind.
    pub fn coerce_json(&self, value: &JsonValue) -> Result<AttrValue, FieldError> {
        let attr = AttrValue::from_json(value).ok_or_else(|| FieldError::KindMismatch {
            field: self.name.to_string(),
            expected: self.kind,
            found: json_kind_name(value),
        })?;
        self.coerce(&attr)
    }
}

struct Field<E> {
    info: FieldInfo,
    get: Getter<E>,
    set: Setter<E>,
}

/// Name-addressable setter table of one entity type.
pub struct EntitySchema<E> {
    entity_name: &'static str,
    identity: Option<&'static str>,
    fields: Vec<Field<E>>,
    by_name: BTreeMap<&'static str, usize>,
}

impl<E: 'static> EntitySchema<E> {
    /// Starts a schema declaration for the entity called `entity_name`.
    pub fn builder(entity_name: &'static str) -> SchemaBuilder<E> {
        SchemaBuilder {
            entity_name,
            identity: None,
            fields: Vec::new(),
        }
    }
}

impl<E> EntitySchema<E> {
    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    /// Attribute designated for upsert matching, if any.
    pub fn identity_attribute(&self) -> Option<&'static str> {
        self.identity
    }

    /// Declared attributes in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = FieldInfo> + '_ {
        self.fields.iter().map(|field| field.info)
    }

    pub fn field(&self, name: &str) -> Option<FieldInfo> {
        self.lookup(name).map(|field| field.info)
    }

    /// Like `field`, but reports undeclared names as `FieldError::UnknownField`.
    pub fn require(&self, name: &str) -> Result<FieldInfo, FieldError> {
        self.field(name).ok_or_else(|| self.unknown(name))
    }

    /// Coerces `value` to the kind of attribute `name`.
    pub fn coerce(&self, name: &str, value: &AttrValue) -> Result<AttrValue, FieldError> {
        self.require(name)?.coerce(value)
    }

    /// Reads attribute `name` of `entity`.
    pub fn get(&self, entity: &E, name: &str) -> Result<AttrValue, FieldError> {
        let field = self.lookup(name).ok_or_else(|| self.unknown(name))?;
        Ok((field.get)(entity))
    }

    /// Assigns `value` to attribute `name` after coercion.
    pub fn set(&self, entity: &mut E, name: &str, value: &AttrValue) -> Result<(), FieldError> {
        let field = self.lookup(name).ok_or_else(|| self.unknown(name))?;
        let coerced = field.info.coerce(value)?;
        (field.set)(entity, coerced)
    }

    /// Assigns a decoded JSON value to attribute `name` after coercion.
    pub fn set_json(&self, entity: &mut E, name: &str, value: &JsonValue) -> Result<(), FieldError> {
        let field = self.lookup(name).ok_or_else(|| self.unknown(name))?;
        let coerced = field.info.coerce_json(value)?;
        (field.set)(entity, coerced)
    }

    /// Encodes every declared attribute of `entity`.
    ///
    /// # Errors
    /// - A current value the field itself would refuse, such as a
    ///   non-finite real.
    pub fn to_attributes(&self, entity: &E) -> Result<Map<String, JsonValue>, FieldError> {
        self.fields
            .iter()
            .map(|field| {
                let value = field.info.coerce(&(field.get)(entity))?;
                Ok((field.info.name.to_string(), value.to_json()))
            })
            .collect()
    }

    /// Checks that attribute `name` can hold `value`, including the range
    /// of its Rust type, without touching any live entity.
    pub fn check(&self, name: &str, value: &AttrValue) -> Result<AttrValue, FieldError>
    where
        E: Default,
    {
        let coerced = self.coerce(name, value)?;
        self.set(&mut E::default(), name, &coerced)?;
        Ok(coerced)
    }

    /// Decodes an attribute map into a fresh entity.
    ///
    /// Undeclared keys are ignored and missing keys keep the default value,
    /// so stored rows survive attributes being added or removed.
    pub fn from_attributes(&self, attributes: &Map<String, JsonValue>) -> Result<E, FieldError>
    where
        E: Default,
    {
        let mut entity = E::default();
        for field in &self.fields {
            if let Some(value) = attributes.get(field.info.name) {
                let coerced = field.info.coerce_json(value)?;
                (field.set)(&mut entity, coerced)?;
            }
        }
        Ok(entity)
    }

    fn lookup(&self, name: &str) -> Option<&Field<E>> {
        self.by_name.get(name).map(|index| &self.fields[*index])
    }

    fn unknown(&self, name: &str) -> FieldError {
        FieldError::UnknownField {
            entity: self.entity_name,
            field: name.to_string(),
        }
    }
}

/// Builder returned by `EntitySchema::builder`.
pub struct SchemaBuilder<E> {
    entity_name: &'static str,
    identity: Option<&'static str>,
    fields: Vec<Field<E>>,
}

impl<E: 'static> SchemaBuilder<E> {
    /// Declares one attribute backed by a getter/setter pair.
    pub fn field<T>(mut self, name: &'static str, get: fn(&E) -> T, set: fn(&mut E, T)) -> Self
    where
        T: FieldType + 'static,
    {
        let info = FieldInfo {
            name,
            kind: T::KIND,
            nullable: T::NULLABLE,
        };
        self.fields.push(Field {
            info,
            get: Box::new(move |entity: &E| get(entity).into_value()),
            set: Box::new(move |entity: &mut E, value: AttrValue| {
                let typed = T::from_value(value.clone()).ok_or_else(|| FieldError::OutOfRange {
                    field: name.to_string(),
                    value,
                })?;
                set(entity, typed);
                Ok(())
            }),
        });
        self
    }

    /// Designates the attribute used for upsert matching.
    pub fn identity(mut self, name: &'static str) -> Self {
        self.identity = Some(name);
        self
    }

    pub fn build(self) -> Result<EntitySchema<E>, SchemaError> {
        if !ATTRIBUTE_NAME_RE.is_match(self.entity_name) {
            return Err(SchemaError::InvalidName(self.entity_name.to_string()));
        }

        let mut by_name = BTreeMap::new();
        for (index, field) in self.fields.iter().enumerate() {
            let name = field.info.name;
            if !ATTRIBUTE_NAME_RE.is_match(name) {
                return Err(SchemaError::InvalidName(name.to_string()));
            }
            if by_name.insert(name, index).is_some() {
                return Err(SchemaError::DuplicateField(name));
            }
        }

        if let Some(identity) = self.identity {
            let index = by_name
                .get(identity)
                .ok_or(SchemaError::UnknownIdentity(identity))?;
            if self.fields[*index].info.nullable {
                return Err(SchemaError::NullableIdentity(identity));
            }
        }

        Ok(EntitySchema {
            entity_name: self.entity_name,
            identity: self.identity,
            fields: self.fields,
            by_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySchema, FieldError, SchemaError};
    use crate::model::value::{AttrKind, AttrValue};
    use serde_json::json;

    #[derive(Debug, Default, PartialEq)]
    struct Tag {
        id: i16,
        name: String,
        weight: Option<f64>,
    }

    fn tag_schema() -> EntitySchema<Tag> {
        EntitySchema::builder("Tag")
            .field("id", |t: &Tag| t.id, |t, v| t.id = v)
            .field("name", |t: &Tag| t.name.clone(), |t, v| t.name = v)
            .field("weight", |t: &Tag| t.weight, |t, v| t.weight = v)
            .identity("id")
            .build()
            .unwrap()
    }

    #[test]
    fn set_json_coerces_and_assigns() {
        let schema = tag_schema();
        let mut tag = Tag::default();
        schema.set_json(&mut tag, "id", &json!(4)).unwrap();
        schema.set_json(&mut tag, "weight", &json!(2)).unwrap();
        assert_eq!(tag.id, 4);
        assert_eq!(tag.weight, Some(2.0));

        schema.set_json(&mut tag, "weight", &json!(null)).unwrap();
        assert_eq!(tag.weight, None);
    }

    #[test]
    fn set_rejects_wrong_kind_and_null_on_required_field() {
        let schema = tag_schema();
        let mut tag = Tag::default();

        let err = schema.set_json(&mut tag, "id", &json!("4")).unwrap_err();
        assert_eq!(
            err,
            FieldError::KindMismatch {
                field: "id".to_string(),
                expected: AttrKind::Integer,
                found: "text",
            }
        );

        let err = schema.set(&mut tag, "name", &AttrValue::Null).unwrap_err();
        assert!(matches!(err, FieldError::NullNotAllowed { .. }));
    }

    #[test]
    fn narrow_integer_field_reports_out_of_range() {
        let schema = tag_schema();
        let mut tag = Tag::default();
        let err = schema.set_json(&mut tag, "id", &json!(70_000)).unwrap_err();
        assert!(matches!(err, FieldError::OutOfRange { ref field, .. } if field == "id"));
        assert_eq!(tag.id, 0);
    }

    #[test]
    fn non_finite_reals_are_refused_on_set_and_encode() {
        let schema = tag_schema();
        let mut tag = Tag::default();
        let err = schema
            .set(&mut tag, "weight", &AttrValue::Real(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, FieldError::OutOfRange { ref field, .. } if field == "weight"));

        tag.weight = Some(f64::INFINITY);
        let err = schema.to_attributes(&tag).unwrap_err();
        assert!(matches!(err, FieldError::OutOfRange { ref field, .. } if field == "weight"));
    }

    #[test]
    fn check_applies_rust_type_range() {
        let schema = tag_schema();
        assert_eq!(
            schema.check("id", &AttrValue::Integer(12)).unwrap(),
            AttrValue::Integer(12)
        );
        let err = schema.check("id", &AttrValue::Integer(70_000)).unwrap_err();
        assert!(matches!(err, FieldError::OutOfRange { .. }));
    }

    #[test]
    fn attributes_roundtrip_ignores_undeclared_keys() {
        let schema = tag_schema();
        let tag = Tag {
            id: 9,
            name: "rust".to_string(),
            weight: None,
        };
        let mut attributes = schema.to_attributes(&tag).unwrap();
        assert_eq!(attributes.get("weight"), Some(&json!(null)));

        attributes.insert("retired_column".to_string(), json!([1, 2]));
        assert_eq!(schema.from_attributes(&attributes).unwrap(), tag);
    }

    #[test]
    fn build_validates_declaration() {
        let duplicate = EntitySchema::<Tag>::builder("Tag")
            .field("id", |t: &Tag| t.id, |t, v| t.id = v)
            .field("id", |t: &Tag| t.id, |t, v| t.id = v)
            .build();
        assert!(matches!(duplicate, Err(SchemaError::DuplicateField("id"))));

        let bad_name = EntitySchema::<Tag>::builder("Tag")
            .field("na me", |t: &Tag| t.name.clone(), |t, v| t.name = v)
            .build();
        assert!(matches!(bad_name, Err(SchemaError::InvalidName(_))));

        let nullable_identity = EntitySchema::<Tag>::builder("Tag")
            .field("weight", |t: &Tag| t.weight, |t, v| t.weight = v)
            .identity("weight")
            .build();
        assert!(matches!(
            nullable_identity,
            Err(SchemaError::NullableIdentity("weight"))
        ));

        let missing_identity = EntitySchema::<Tag>::builder("Tag").identity("id").build();
        assert!(matches!(
            missing_identity,
            Err(SchemaError::UnknownIdentity("id"))
        ));
    }
}
