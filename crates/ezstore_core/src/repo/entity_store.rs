//! Typed entity store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide count/read/insert/update/delete/commit over one entity kind.
//! - Keep SQL and attribute encoding inside the persistence boundary.
//!
//! # Invariants
//! - Every write is staged through the context and durable only on commit.
//! - Predicates and orderings may only reference declared attributes.
//! - Read paths reject undecodable stored rows instead of masking them.
//! - Default read order is ascending `ObjectId` (insertion order).

use crate::db::{Context, DbError};
use crate::model::entity::{Entity, Managed, ObjectId};
use crate::model::predicate::{CompareOp, Predicate, SortDescriptor};
use crate::model::schema::{EntitySchema, FieldError};
use crate::model::value::AttrValue;
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level failure of a read, write or commit.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    UnknownAttribute {
        entity: &'static str,
        attribute: String,
    },
    InvalidValue(FieldError),
    NotFound(ObjectId),
    InvalidData(String),
    ContextPoisoned,
    Dispatch(std::io::Error),
    WorkerPanicked(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::InvalidValue(err) => write!(f, "{err}"),
            Self::NotFound(object_id) => write!(f, "managed object not found: {object_id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
            Self::ContextPoisoned => f.write_str("context lock poisoned by an earlier panic"),
            Self::Dispatch(err) => write!(f, "failed to start background worker: {err}"),
            Self::WorkerPanicked(message) => write!(f, "background worker panicked: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidValue(err) => Some(err),
            Self::Dispatch(err) => Some(err),
            Self::UnknownAttribute { .. }
            | Self::NotFound(_)
            | Self::InvalidData(_)
            | Self::ContextPoisoned
            | Self::WorkerPanicked(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<FieldError> for StoreError {
    fn from(value: FieldError) -> Self {
        match value {
            FieldError::UnknownField { entity, field } => Self::UnknownAttribute {
                entity,
                attribute: field,
            },
            other => Self::InvalidValue(other),
        }
    }
}

/// Repository interface over one entity kind.
pub trait EntityStore<E: Entity> {
    fn count(&self) -> StoreResult<u64>;
    fn count_matching(&self, predicate: &Predicate) -> StoreResult<u64>;
    /// Reads every entity in store order.
    fn read_all(&self) -> StoreResult<Vec<Managed<E>>>;
    /// Reads every entity ordered by `sort`, ties broken by store order.
    fn read_all_sorted(&self, sort: &[SortDescriptor]) -> StoreResult<Vec<Managed<E>>>;
    fn read_matching(
        &self,
        predicate: &Predicate,
        sort: &[SortDescriptor],
    ) -> StoreResult<Vec<Managed<E>>>;
    /// Reads the first entity (in store order) matching `predicate`.
    fn read_first(&self, predicate: &Predicate) -> StoreResult<Option<Managed<E>>>;
    /// Stages a new entity.
    fn insert(&self, entity: E) -> StoreResult<Managed<E>>;
    /// Stages the current attribute values of `managed`.
    fn update(&self, managed: &Managed<E>) -> StoreResult<()>;
    /// Stages removal of `managed`; commits when `commit_now`.
    ///
    /// Removing an object that is already gone is a no-op.
    fn delete(&self, managed: Managed<E>, commit_now: bool) -> StoreResult<()>;
    /// Stages removal of every entity of this kind; returns how many.
    fn delete_all(&self, commit_now: bool) -> StoreResult<u64>;
    /// Stages removal of every entity not listed in `keep`; returns how many.
    fn delete_all_except(&self, keep: &[ObjectId], commit_now: bool) -> StoreResult<u64>;
    fn commit(&self) -> StoreResult<()>;
}

/// SQLite-backed entity store bound to one context.
pub struct SqliteEntityStore<'ctx, E> {
    ctx: &'ctx Context,
    _entity: PhantomData<fn() -> E>,
}

impl<'ctx, E: Entity> SqliteEntityStore<'ctx, E> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    fn schema(&self) -> &'static EntitySchema<E> {
        E::schema()
    }

    fn query(
        &self,
        predicate: &Predicate,
        sort: &[SortDescriptor],
        limit: Option<u32>,
    ) -> StoreResult<Vec<Managed<E>>> {
        let mut filter = SqlFilter::for_entity(E::entity_name());
        filter.push_predicate(self.schema(), predicate)?;
        let order_by = order_by_clause(self.schema(), sort)?;

        let mut sql = format!(
            "SELECT object_id, attributes FROM managed_objects WHERE {} ORDER BY {order_by}",
            filter.sql
        );
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            filter.binds.push(Value::Integer(i64::from(limit)));
        }

        let conn = self.ctx.reader();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.binds))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(self.parse_row(row)?);
        }
        Ok(entities)
    }

    fn parse_row(&self, row: &Row<'_>) -> StoreResult<Managed<E>> {
        let object_id = ObjectId::new(row.get("object_id")?);
        let attributes_text: String = row.get("attributes")?;
        let attributes: Map<String, JsonValue> = serde_json::from_str(&attributes_text)
            .map_err(|err| {
                StoreError::InvalidData(format!("{object_id} has malformed attributes: {err}"))
            })?;
        let entity = self.schema().from_attributes(&attributes).map_err(|err| {
            StoreError::InvalidData(format!(
                "{object_id} cannot be decoded as `{}`: {err}",
                E::entity_name()
            ))
        })?;
        Ok(Managed::new(object_id, entity))
    }

    fn encode(&self, entity: &E) -> StoreResult<String> {
        let attributes = self.schema().to_attributes(entity)?;
        serde_json::to_string(&attributes)
            .map_err(|err| StoreError::InvalidData(format!("cannot encode attributes: {err}")))
    }

    fn commit_if(&self, commit_now: bool) -> StoreResult<()> {
        if commit_now {
            self.ctx.commit()?;
        }
        Ok(())
    }
}

impl<E: Entity> EntityStore<E> for SqliteEntityStore<'_, E> {
    fn count(&self) -> StoreResult<u64> {
        self.count_matching(&Predicate::True)
    }

    fn count_matching(&self, predicate: &Predicate) -> StoreResult<u64> {
        let mut filter = SqlFilter::for_entity(E::entity_name());
        filter.push_predicate(self.schema(), predicate)?;
        let sql = format!("SELECT COUNT(*) FROM managed_objects WHERE {};", filter.sql);

        let count: i64 =
            self.ctx
                .reader()
                .query_row(&sql, params_from_iter(filter.binds), |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative row count `{count}`")))
    }

    fn read_all(&self) -> StoreResult<Vec<Managed<E>>> {
        self.query(&Predicate::True, &[], None)
    }

    fn read_all_sorted(&self, sort: &[SortDescriptor]) -> StoreResult<Vec<Managed<E>>> {
        self.query(&Predicate::True, sort, None)
    }

    fn read_matching(
        &self,
        predicate: &Predicate,
        sort: &[SortDescriptor],
    ) -> StoreResult<Vec<Managed<E>>> {
        self.query(predicate, sort, None)
    }

    fn read_first(&self, predicate: &Predicate) -> StoreResult<Option<Managed<E>>> {
        Ok(self.query(predicate, &[], Some(1))?.into_iter().next())
    }

    fn insert(&self, entity: E) -> StoreResult<Managed<E>> {
        let attributes = self.encode(&entity)?;
        let conn = self.ctx.writer()?;
        conn.execute(
            "INSERT INTO managed_objects (entity, attributes) VALUES (?1, ?2);",
            params![E::entity_name(), attributes],
        )?;
        let object_id = ObjectId::new(conn.last_insert_rowid());
        debug!(
            "event=object_insert module=repo status=ok entity={} object_id={} context_id={}",
            E::entity_name(),
            object_id,
            self.ctx.context_id()
        );
        Ok(Managed::new(object_id, entity))
    }

    fn update(&self, managed: &Managed<E>) -> StoreResult<()> {
        let attributes = self.encode(managed)?;
        let changed = self.ctx.writer()?.execute(
            "UPDATE managed_objects
             SET
                attributes = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE object_id = ?2
               AND entity = ?3;",
            params![attributes, managed.object_id().get(), E::entity_name()],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(managed.object_id()));
        }
        Ok(())
    }

    fn delete(&self, managed: Managed<E>, commit_now: bool) -> StoreResult<()> {
        let object_id = managed.object_id();
        let changed = self.ctx.writer()?.execute(
            "DELETE FROM managed_objects WHERE object_id = ?1 AND entity = ?2;",
            params![object_id.get(), E::entity_name()],
        )?;
        if changed == 0 {
            debug!(
                "event=object_delete module=repo status=noop entity={} object_id={}",
                E::entity_name(),
                object_id
            );
        }
        self.commit_if(commit_now)
    }

    fn delete_all(&self, commit_now: bool) -> StoreResult<u64> {
        let removed = self.ctx.writer()?.execute(
            "DELETE FROM managed_objects WHERE entity = ?1;",
            [E::entity_name()],
        )?;
        info!(
            "event=object_purge module=repo status=ok entity={} removed={} context_id={}",
            E::entity_name(),
            removed,
            self.ctx.context_id()
        );
        self.commit_if(commit_now)?;
        Ok(removed as u64)
    }

    fn delete_all_except(&self, keep: &[ObjectId], commit_now: bool) -> StoreResult<u64> {
        let keep: HashSet<ObjectId> = keep.iter().copied().collect();
        let conn = self.ctx.writer()?;

        let mut select =
            conn.prepare("SELECT object_id FROM managed_objects WHERE entity = ?1;")?;
        let stale = select
            .query_map([E::entity_name()], |row| row.get::<_, i64>(0))?
            .map(|raw| raw.map(ObjectId::new))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|object_id| !keep.contains(object_id))
            .collect::<Vec<_>>();

        let mut delete = conn.prepare_cached("DELETE FROM managed_objects WHERE object_id = ?1;")?;
        for object_id in &stale {
            delete.execute([object_id.get()])?;
        }

        info!(
            "event=object_prune module=repo status=ok entity={} kept={} removed={} context_id={}",
            E::entity_name(),
            keep.len(),
            stale.len(),
            self.ctx.context_id()
        );
        self.commit_if(commit_now)?;
        Ok(stale.len() as u64)
    }

    fn commit(&self) -> StoreResult<()> {
        self.ctx.commit()?;
        Ok(())
    }
}

/// WHERE clause under construction with its positional bind values.
struct SqlFilter {
    sql: String,
    binds: Vec<Value>,
}

impl SqlFilter {
    fn for_entity(entity_name: &str) -> Self {
        Self {
            sql: String::from("entity = ?"),
            binds: vec![Value::Text(entity_name.to_string())],
        }
    }

    fn push_predicate<E>(
        &mut self,
        schema: &EntitySchema<E>,
        predicate: &Predicate,
    ) -> StoreResult<()> {
        if matches!(predicate, Predicate::True) {
            return Ok(());
        }
        self.sql.push_str(" AND (");
        self.push_expr(schema, predicate)?;
        self.sql.push(')');
        Ok(())
    }

    fn push_expr<E>(&mut self, schema: &EntitySchema<E>, predicate: &Predicate) -> StoreResult<()> {
        match predicate {
            Predicate::True => self.sql.push('1'),
            Predicate::Compare {
                attribute,
                op,
                value,
            } => {
                let field = schema.require(attribute)?;
                let column = attribute_column(field.name);
                match (op, value) {
                    (CompareOp::Eq, AttrValue::Null) => {
                        self.sql.push_str(&format!("{column} IS NULL"));
                    }
                    (CompareOp::Ne, AttrValue::Null) => {
                        self.sql.push_str(&format!("{column} IS NOT NULL"));
                    }
                    (op, value) => {
                        let coerced = field.coerce(value)?;
                        self.sql
                            .push_str(&format!("{column} {} ?", compare_sql(*op)));
                        self.binds.push(bind_value(&coerced));
                    }
                }
            }
            Predicate::IsNull(attribute) => {
                let field = schema.require(attribute)?;
                self.sql
                    .push_str(&format!("{} IS NULL", attribute_column(field.name)));
            }
            Predicate::In { attribute, values } => {
                let field = schema.require(attribute)?;
                if values.is_empty() {
                    self.sql.push('0');
                    return Ok(());
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                self.sql.push_str(&format!(
                    "{} IN ({placeholders})",
                    attribute_column(field.name)
                ));
                for value in values {
                    self.binds.push(bind_value(&field.coerce(value)?));
                }
            }
            Predicate::And(parts) => self.push_group(schema, parts, " AND ", '1')?,
            Predicate::Or(parts) => self.push_group(schema, parts, " OR ", '0')?,
            Predicate::Not(inner) => {
                self.sql.push_str("NOT (");
                self.push_expr(schema, inner)?;
                self.sql.push(')');
            }
        }
        Ok(())
    }

    fn push_group<E>(
        &mut self,
        schema: &EntitySchema<E>,
        parts: &[Predicate],
        joiner: &str,
        empty: char,
    ) -> StoreResult<()> {
        if parts.is_empty() {
            self.sql.push(empty);
            return Ok(());
        }
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                self.sql.push_str(joiner);
            }
            self.sql.push('(');
            self.push_expr(schema, part)?;
            self.sql.push(')');
        }
        Ok(())
    }
}

fn order_by_clause<E>(schema: &EntitySchema<E>, sort: &[SortDescriptor]) -> StoreResult<String> {
    let mut terms = Vec::with_capacity(sort.len() + 1);
    for descriptor in sort {
        let field = schema.require(&descriptor.attribute)?;
        let direction = if descriptor.ascending { "ASC" } else { "DESC" };
        terms.push(format!("{} {direction}", attribute_column(field.name)));
    }
    terms.push("object_id ASC".to_string());
    Ok(terms.join(", "))
}

// Attribute names are validated identifiers, so inlining them is safe.
fn attribute_column(name: &str) -> String {
    format!("json_extract(attributes, '$.{name}')")
}

fn compare_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "IS NOT",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    }
}

fn bind_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        AttrValue::Integer(number) => Value::Integer(*number),
        AttrValue::Real(number) => Value::Real(*number),
        AttrValue::Text(text) => Value::Text(text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::{order_by_clause, SqlFilter};
    use crate::model::predicate::{Predicate, SortDescriptor};
    use crate::model::schema::EntitySchema;
    use rusqlite::types::Value;

    #[derive(Default)]
    struct Probe {
        id: i64,
        done: bool,
    }

    fn probe_schema() -> EntitySchema<Probe> {
        EntitySchema::builder("Probe")
            .field("id", |p: &Probe| p.id, |p, v| p.id = v)
            .field("done", |p: &Probe| p.done, |p, v| p.done = v)
            .identity("id")
            .build()
            .unwrap()
    }

    #[test]
    fn compiles_nested_predicates_with_binds() {
        let schema = probe_schema();
        let mut filter = SqlFilter::for_entity("Probe");
        let predicate = Predicate::gt("id", 2).and(Predicate::eq("done", true).not());
        filter.push_predicate(&schema, &predicate).unwrap();

        assert_eq!(
            filter.sql,
            "entity = ? AND ((json_extract(attributes, '$.id') > ?) AND (NOT (json_extract(attributes, '$.done') = ?)))"
        );
        assert_eq!(
            filter.binds,
            vec![
                Value::Text("Probe".to_string()),
                Value::Integer(2),
                Value::Integer(1)
            ]
        );
    }

    #[test]
    fn rejects_undeclared_attributes_and_wrong_kinds() {
        let schema = probe_schema();
        let mut filter = SqlFilter::for_entity("Probe");
        assert!(filter
            .push_predicate(&schema, &Predicate::eq("title", "A"))
            .is_err());

        let mut filter = SqlFilter::for_entity("Probe");
        assert!(filter
            .push_predicate(&schema, &Predicate::eq("id", "1"))
            .is_err());

        assert!(order_by_clause(&schema, &[SortDescriptor::asc("title")]).is_err());
    }

    #[test]
    fn empty_in_matches_nothing() {
        let schema = probe_schema();
        let mut filter = SqlFilter::for_entity("Probe");
        filter
            .push_predicate(&schema, &Predicate::is_in("id", Vec::<i64>::new()))
            .unwrap();
        assert_eq!(filter.sql, "entity = ? AND (0)");
    }
}
