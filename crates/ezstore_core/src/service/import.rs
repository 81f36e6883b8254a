//! Bulk import of raw records with get-or-create by identity.
//!
//! # Responsibility
//! - Upsert an ordered list of records by an identity attribute.
//! - Assign the remaining record fields by name through the entity schema.
//! - Commit the whole batch once, or leave it staged, per `ImportOptions`.
//! - Offer blocking and background entry points over one algorithm.
//!
//! # Invariants
//! - Results preserve input order.
//! - A record without its identity aborts the batch before anything of that
//!   record is staged; earlier records stay staged but uncommitted.
//! - Undeclared record fields are ignored.
//! - At most one commit per call.

use crate::db::{Context, SharedContext};
use crate::model::entity::{Entity, Managed, ObjectId};
use crate::model::record::{records_from_json, RawRecord, RecordShapeError};
use crate::model::schema::{FieldError, FieldInfo};
use crate::repo::entity_store::{EntityStore, SqliteEntityStore, StoreError, StoreResult};
use crate::service::dispatch::{dispatch, Dispatched};
use crate::service::result::OperationResult;
use crate::service::upsert::{Resolution, UpsertResolver};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Whether an import commits its batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// One commit after every record is staged.
    #[default]
    Commit,
    /// Leave the batch staged; the caller commits or discards.
    StageOnly,
}

/// What happens when a declared field cannot take a record value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFailurePolicy {
    /// Keep the previous value and log a warning.
    #[default]
    Skip,
    /// Fail the import with `ImportError::Field`.
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub commit: CommitPolicy,
    pub field_failures: FieldFailurePolicy,
}

impl ImportOptions {
    /// Stage the batch without committing.
    pub fn staged() -> Self {
        Self {
            commit: CommitPolicy::StageOnly,
            ..Self::default()
        }
    }

    /// Same options, but field assignment failures abort the import.
    pub fn strict(self) -> Self {
        Self {
            field_failures: FieldFailurePolicy::Abort,
            ..self
        }
    }
}

/// Import failure.
#[derive(Debug)]
pub enum ImportError {
    /// The identity key is not a declared attribute.
    UnknownIdentity { entity: &'static str, key: String },
    /// The schema designates no identity attribute.
    NoIdentityAttribute { entity: &'static str },
    /// Record `index` has no value (or `null`) at the identity key.
    MissingIdentity { index: usize, key: String },
    /// Record `index` has an identity value of the wrong kind, or one its
    /// Rust field cannot hold.
    InvalidIdentity { index: usize, source: FieldError },
    /// Record `index` has a field value the entity cannot take.
    Field { index: usize, source: FieldError },
    /// Decoded input is not a list of objects.
    Shape(RecordShapeError),
    Storage(StoreError),
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownIdentity { entity, key } => {
                write!(f, "identity key `{key}` is not an attribute of `{entity}`")
            }
            Self::NoIdentityAttribute { entity } => {
                write!(f, "`{entity}` declares no identity attribute")
            }
            Self::MissingIdentity { index, key } => {
                write!(f, "record {index} has no identity value at `{key}`")
            }
            Self::InvalidIdentity { index, source } => {
                write!(f, "record {index} has an invalid identity: {source}")
            }
            Self::Field { index, source } => write!(f, "record {index}: {source}"),
            Self::Shape(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdentity { source, .. } | Self::Field { source, .. } => Some(source),
            Self::Shape(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::UnknownIdentity { .. }
            | Self::NoIdentityAttribute { .. }
            | Self::MissingIdentity { .. } => None,
        }
    }
}

impl From<StoreError> for ImportError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<RecordShapeError> for ImportError {
    fn from(value: RecordShapeError) -> Self {
        Self::Shape(value)
    }
}

/// Result of `BulkImporter::sync_list`.
#[derive(Debug)]
pub struct SyncOutcome<E> {
    /// Imported entities in input order.
    pub imported: Vec<Managed<E>>,
    /// Entities removed because their identity was not in the list.
    pub deleted: u64,
}

/// Upsert-and-update engine over one entity store.
pub struct BulkImporter<E, S> {
    resolver: UpsertResolver<E, S>,
}

impl<'ctx, E: Entity> BulkImporter<E, SqliteEntityStore<'ctx, E>> {
    /// Importer over the SQLite store of `ctx`.
    pub fn for_context(ctx: &'ctx Context) -> Self {
        Self::new(SqliteEntityStore::new(ctx))
    }
}

impl<E: Entity, S: EntityStore<E>> BulkImporter<E, S> {
    pub fn new(store: S) -> Self {
        Self {
            resolver: UpsertResolver::new(store),
        }
    }

    pub fn resolver(&self) -> &UpsertResolver<E, S> {
        &self.resolver
    }

    /// Imports `records` in order, upserting each by `identity_key`.
    pub fn import_list(
        &self,
        records: &[RawRecord],
        identity_key: &str,
        options: &ImportOptions,
    ) -> Result<Vec<Managed<E>>, ImportError> {
        self.run(records, identity_key, options).into_result()
    }

    /// Imports `records` keyed by the schema's identity attribute.
    pub fn import_records(
        &self,
        records: &[RawRecord],
        options: &ImportOptions,
    ) -> Result<Vec<Managed<E>>, ImportError> {
        let key = E::schema()
            .identity_attribute()
            .ok_or(ImportError::NoIdentityAttribute {
                entity: E::entity_name(),
            })?;
        self.import_list(records, key, options)
    }

    /// Imports a decoded JSON array of objects.
    pub fn import_json(
        &self,
        value: JsonValue,
        identity_key: &str,
        options: &ImportOptions,
    ) -> Result<Vec<Managed<E>>, ImportError> {
        let records = records_from_json(value)?;
        self.import_list(&records, identity_key, options)
    }

    /// Imports one record.
    pub fn import_object(
        &self,
        record: &RawRecord,
        identity_key: &str,
        options: &ImportOptions,
    ) -> Result<Managed<E>, ImportError> {
        let identity = self.identity_field(identity_key)?;
        let (managed, _) = self.stage_record(0, record, identity, options)?;
        self.finish(options)?;
        Ok(managed)
    }

    /// Imports `records`, then removes every entity of this kind that the
    /// list did not mention. One commit covers both steps.
    pub fn sync_list(
        &self,
        records: &[RawRecord],
        identity_key: &str,
        options: &ImportOptions,
    ) -> Result<SyncOutcome<E>, ImportError> {
        let started_at = Instant::now();
        let imported = self.stage_all(records, identity_key, options)?;
        let keep: Vec<ObjectId> = imported.iter().map(Managed::object_id).collect();
        let deleted = self.resolver.store().delete_all_except(&keep, false)?;
        self.finish(options)?;

        info!(
            "event=sync_list module=import status=ok entity={} records={} deleted={} duration_ms={}",
            E::entity_name(),
            records.len(),
            deleted,
            started_at.elapsed().as_millis()
        );
        Ok(SyncOutcome { imported, deleted })
    }

    /// The one import algorithm behind the blocking and background forms.
    pub(crate) fn run(
        &self,
        records: &[RawRecord],
        identity_key: &str,
        options: &ImportOptions,
    ) -> OperationResult<Vec<Managed<E>>, ImportError> {
        let started_at = Instant::now();
        info!(
            "event=import_list module=import status=start entity={} records={} identity_key={}",
            E::entity_name(),
            records.len(),
            identity_key
        );

        let outcome = self
            .stage_all(records, identity_key, options)
            .and_then(|imported| {
                self.finish(options)?;
                Ok(imported)
            });

        match &outcome {
            Ok(imported) => info!(
                "event=import_list module=import status=ok entity={} imported={} duration_ms={}",
                E::entity_name(),
                imported.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=import_list module=import status=error entity={} duration_ms={} error={}",
                E::entity_name(),
                started_at.elapsed().as_millis(),
                err
            ),
        }
        outcome.into()
    }

    fn identity_field(&self, identity_key: &str) -> Result<FieldInfo, ImportError> {
        E::schema()
            .field(identity_key)
            .ok_or_else(|| ImportError::UnknownIdentity {
                entity: E::entity_name(),
                key: identity_key.to_string(),
            })
    }

    fn stage_all(
        &self,
        records: &[RawRecord],
        identity_key: &str,
        options: &ImportOptions,
    ) -> Result<Vec<Managed<E>>, ImportError> {
        let identity = self.identity_field(identity_key)?;
        let mut imported = Vec::with_capacity(records.len());
        let mut created = 0_usize;

        for (index, record) in records.iter().enumerate() {
            let (managed, resolution) = self.stage_record(index, record, identity, options)?;
            if resolution == Resolution::Created {
                created += 1;
            }
            imported.push(managed);
        }

        debug!(
            "event=import_stage module=import status=ok entity={} created={} updated={}",
            E::entity_name(),
            created,
            imported.len() - created
        );
        Ok(imported)
    }

    fn stage_record(
        &self,
        index: usize,
        record: &RawRecord,
        identity: FieldInfo,
        options: &ImportOptions,
    ) -> Result<(Managed<E>, Resolution), ImportError> {
        let raw = match record.get(identity.name) {
            None | Some(JsonValue::Null) => {
                return Err(ImportError::MissingIdentity {
                    index,
                    key: identity.name.to_string(),
                })
            }
            Some(raw) => raw,
        };
        let value = identity
            .coerce_json(raw)
            .and_then(|value| E::schema().check(identity.name, &value))
            .map_err(|source| ImportError::InvalidIdentity { index, source })?;

        let (mut managed, resolution) = self.resolver.resolve(identity.name, &value)?;
        assign_fields(&mut *managed, index, record, identity.name, options.field_failures)?;
        self.resolver.store().update(&managed)?;
        Ok((managed, resolution))
    }

    fn finish(&self, options: &ImportOptions) -> StoreResult<()> {
        match options.commit {
            CommitPolicy::Commit => self.resolver.store().commit(),
            CommitPolicy::StageOnly => Ok(()),
        }
    }
}

fn assign_fields<E: Entity>(
    entity: &mut E,
    index: usize,
    record: &RawRecord,
    identity_key: &str,
    policy: FieldFailurePolicy,
) -> Result<(), ImportError> {
    let schema = E::schema();
    for (name, value) in record {
        if name == identity_key {
            continue;
        }
        if schema.field(name).is_none() {
            debug!(
                "event=import_field module=import status=ignored entity={} field={}",
                E::entity_name(),
                name
            );
            continue;
        }
        if let Err(source) = schema.set_json(entity, name, value) {
            match policy {
                FieldFailurePolicy::Abort => return Err(ImportError::Field { index, source }),
                FieldFailurePolicy::Skip => warn!(
                    "event=import_field module=import status=skipped entity={} index={} error={}",
                    E::entity_name(),
                    index,
                    source
                ),
            }
        }
    }
    Ok(())
}

/// Runs `import_list` in the background on `ctx`.
///
/// `completion` runs exactly once on the worker thread, including for
/// structural failures such as `ImportError::MissingIdentity`.
///
/// # Errors
/// - `StoreError::Dispatch` when the worker cannot be started; `completion`
///   is then dropped without being called.
pub fn import_list_async<E, F>(
    ctx: &SharedContext,
    records: Vec<RawRecord>,
    identity_key: impl Into<String>,
    options: ImportOptions,
    completion: F,
) -> StoreResult<Dispatched>
where
    E: Entity,
    F: FnOnce(OperationResult<Vec<Managed<E>>, ImportError>) + Send + 'static,
{
    let identity_key = identity_key.into();
    dispatch(
        "import_list",
        ctx,
        move |ctx: &Context| {
            BulkImporter::<E, SqliteEntityStore<'_, E>>::for_context(ctx).run(
                &records,
                &identity_key,
                &options,
            )
        },
        completion,
    )
}
