//! Managed entity contract and handles.
//!
//! # Responsibility
//! - Define what a type needs to be stored and upserted.
//! - Pair stored values with their permanent store identity.
//!
//! # Invariants
//! - Two handles denote the same instance iff their `ObjectId`s are equal.
//! - `Managed` is not `Clone`; deleting consumes the handle.

use crate::model::schema::EntitySchema;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Deref, DerefMut};

/// A record type persisted through a `Context`.
///
/// Implementors expose a schema built once, usually in a
/// `once_cell::sync::Lazy` static. `Default` supplies the initial value of a
/// freshly created instance before attributes are assigned.
pub trait Entity: Default + Send + 'static {
    fn schema() -> &'static EntitySchema<Self>;

    fn entity_name() -> &'static str {
        Self::schema().entity_name()
    }
}

/// Permanent store identity of one managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(i64);

impl ObjectId {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Entity value bound to its store identity.
///
/// Mutations through `DerefMut` are local until staged with
/// `EntityStore::update`.
pub struct Managed<E> {
    object_id: ObjectId,
    entity: E,
}

impl<E> Managed<E> {
    pub(crate) fn new(object_id: ObjectId, entity: E) -> Self {
        Self { object_id, entity }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn into_inner(self) -> E {
        self.entity
    }
}

impl<E> Deref for Managed<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

impl<E> DerefMut for Managed<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.entity
    }
}

impl<E: Debug> Debug for Managed<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Managed")
            .field("object_id", &self.object_id)
            .field("entity", &self.entity)
            .finish()
    }
}
