//! Unit-of-work context over one SQLite connection.
//!
//! # Responsibility
//! - Stage writes inside a lazily opened transaction.
//! - Make staged writes durable on `commit`, drop them on `discard`.
//!
//! # Invariants
//! - Reads through a context see that context's staged writes.
//! - Other contexts see only committed state.
//! - A context is `Send` but not `Sync`; concurrent use goes through
//!   `SharedContext`, whose mutex serializes writers.

use super::migrations::{current_user_version, latest_version};
use super::{open_db, DbError, DbResult};
use crate::config::StoreConfig;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Context handle accepted by background operations.
pub type SharedContext = Arc<Mutex<Context>>;

/// Transactional context for managed entities.
pub struct Context {
    conn: Connection,
    context_id: Uuid,
}

impl Context {
    /// Opens the store described by `config`.
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        Ok(Self::wrap(open_db(config)?))
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Wraps an already opened connection.
    ///
    /// # Errors
    /// - `DbError::UninitializedConnection` when the connection was not
    ///   migrated to the latest schema version.
    pub fn from_connection(conn: Connection) -> DbResult<Self> {
        let actual_version = current_user_version(&conn)?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(DbError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        let context_id = Uuid::new_v4();
        debug!("event=context_open module=db status=ok context_id={context_id}");
        Self { conn, context_id }
    }

    /// Moves this context behind a mutex for background operations.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Identifier used to correlate log events of one context.
    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Returns whether writes are staged and not yet committed.
    pub fn has_changes(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Persists every staged write. A context without changes commits
    /// trivially.
    ///
    /// # Errors
    /// - `DbError::Sqlite` when SQLite rejects the transaction. Staged writes
    ///   stay pending; the caller may `discard` them.
    pub fn commit(&self) -> DbResult<()> {
        if !self.has_changes() {
            return Ok(());
        }

        let started_at = Instant::now();
        match self.conn.execute_batch("COMMIT;") {
            Ok(()) => {
                info!(
                    "event=context_commit module=db status=ok context_id={} duration_ms={}",
                    self.context_id,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=context_commit module=db status=error context_id={} duration_ms={} error={}",
                    self.context_id,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Drops every staged write.
    pub fn discard(&self) -> DbResult<()> {
        if !self.has_changes() {
            return Ok(());
        }

        self.conn.execute_batch("ROLLBACK;")?;
        info!(
            "event=context_discard module=db status=ok context_id={}",
            self.context_id
        );
        Ok(())
    }

    /// Connection for reads. Reads never open a transaction.
    pub(crate) fn reader(&self) -> &Connection {
        &self.conn
    }

    /// Connection for staged writes; opens the transaction on first use.
    pub(crate) fn writer(&self) -> DbResult<&Connection> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN DEFERRED;")?;
            debug!(
                "event=context_begin module=db status=ok context_id={}",
                self.context_id
            );
        }
        Ok(&self.conn)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.has_changes() {
            warn!(
                "event=context_drop module=db status=discarded context_id={}",
                self.context_id
            );
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                error!(
                    "event=context_drop module=db status=error context_id={} error={}",
                    self.context_id, err
                );
            }
        }
    }
}
