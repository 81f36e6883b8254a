//! Get-or-create by attribute value.
//!
//! # Responsibility
//! - Find the entity whose attribute equals a value, or stage a new one.
//!
//! # Invariants
//! - Never commits; creations stay staged in the context.
//! - Repeated calls with the same value on one context return the same
//!   `ObjectId`, because reads see the context's staged writes.
//! - Lookup failures degrade to "not found".

use crate::db::Context;
use crate::model::entity::{Entity, Managed};
use crate::model::predicate::Predicate;
use crate::model::value::AttrValue;
use crate::repo::entity_store::{EntityStore, SqliteEntityStore, StoreResult};
use log::warn;
use std::marker::PhantomData;

/// Whether `resolve` found an existing entity or staged a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found,
    Created,
}

/// Upsert helper over one entity store.
pub struct UpsertResolver<E, S> {
    store: S,
    _entity: PhantomData<fn() -> E>,
}

impl<'ctx, E: Entity> UpsertResolver<E, SqliteEntityStore<'ctx, E>> {
    /// Resolver over the SQLite store of `ctx`.
    pub fn for_context(ctx: &'ctx Context) -> Self {
        Self::new(SqliteEntityStore::new(ctx))
    }
}

impl<E: Entity, S: EntityStore<E>> UpsertResolver<E, S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the entity whose `attribute` equals `value`, staging a new one
    /// when none exists.
    ///
    /// Returns `None` only when creation is impossible: `attribute` is not
    /// declared, `value` has the wrong kind, or the store refused the insert.
    /// The reason is logged.
    pub fn get_or_create(
        &self,
        attribute: &str,
        value: impl Into<AttrValue>,
    ) -> Option<Managed<E>> {
        match self.resolve(attribute, &value.into()) {
            Ok((managed, _)) => Some(managed),
            Err(err) => {
                warn!(
                    "event=get_or_create module=upsert status=error entity={} attribute={} error={}",
                    E::entity_name(),
                    attribute,
                    err
                );
                None
            }
        }
    }

    /// Error-reporting form of `get_or_create`.
    pub fn resolve(
        &self,
        attribute: &str,
        value: &AttrValue,
    ) -> StoreResult<(Managed<E>, Resolution)> {
        let schema = E::schema();
        let value = schema.coerce(attribute, value)?;

        match self.store.read_first(&Predicate::eq(attribute, value.clone())) {
            Ok(Some(found)) => return Ok((found, Resolution::Found)),
            Ok(None) => {}
            Err(err) => warn!(
                "event=get_or_create module=upsert status=degraded entity={} attribute={} error={}",
                E::entity_name(),
                attribute,
                err
            ),
        }

        let mut entity = E::default();
        schema.set(&mut entity, attribute, &value)?;
        let created = self.store.insert(entity)?;
        Ok((created, Resolution::Created))
    }
}
