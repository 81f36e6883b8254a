//! Embedded object store for typed entities on SQLite.
//! Entities are read, staged and committed through a `Context`, and
//! imported in bulk by identity.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{LoggingConfig, StoreConfig};
pub use db::{Context, DbError, DbResult, SharedContext};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, Managed, ObjectId};
pub use model::predicate::{CompareOp, Predicate, SortDescriptor};
pub use model::record::{records_from_json, RawRecord, RecordShapeError};
pub use model::schema::{EntitySchema, FieldError, FieldInfo, FieldType, SchemaError};
pub use model::value::{AttrKind, AttrValue};
pub use repo::entity_store::{EntityStore, SqliteEntityStore, StoreError, StoreResult};
pub use service::dispatch::{count_async, read_all_async, Dispatched};
pub use service::import::{
    import_list_async, BulkImporter, CommitPolicy, FieldFailurePolicy, ImportError,
    ImportOptions, SyncOutcome,
};
pub use service::result::OperationResult;
pub use service::upsert::{Resolution, UpsertResolver};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
