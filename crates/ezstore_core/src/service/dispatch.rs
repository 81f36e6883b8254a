//! Background execution of store operations.
//!
//! # Responsibility
//! - Run one operation on a named worker thread against a shared context.
//! - Deliver its `OperationResult` to the completion exactly once.
//!
//! # Invariants
//! - The completion always runs on the worker, never on the caller.
//! - The context lock is held for the whole operation.
//! - Poisoned locks and panicking jobs become failures, not panics.
//! - Spawn failure is the only synchronous error; the completion is then
//!   never invoked.

use crate::db::{Context, SharedContext};
use crate::model::entity::{Entity, Managed};
use crate::repo::entity_store::{EntityStore, SqliteEntityStore, StoreError, StoreResult};
use crate::service::result::OperationResult;
use log::{error, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Handle of a started background operation.
pub struct Dispatched {
    operation: &'static str,
    handle: JoinHandle<()>,
}

impl Dispatched {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Returns whether the worker, including its completion, has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the worker has run the completion.
    ///
    /// # Errors
    /// - `StoreError::WorkerPanicked` when the completion itself panicked.
    pub fn join(self) -> StoreResult<()> {
        self.handle
            .join()
            .map_err(|payload| StoreError::WorkerPanicked(panic_message(payload.as_ref())))
    }
}

/// Runs `job` on a worker thread and hands its result to `completion`.
pub(crate) fn dispatch<T, E, Job, Done>(
    operation: &'static str,
    ctx: &SharedContext,
    job: Job,
    completion: Done,
) -> StoreResult<Dispatched>
where
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
    Job: FnOnce(&Context) -> OperationResult<T, E> + Send + 'static,
    Done: FnOnce(OperationResult<T, E>) + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    let spawned = thread::Builder::new()
        .name(format!("ezstore-{operation}"))
        .spawn(move || {
            let started_at = Instant::now();
            let result = run_locked(&ctx, job);
            info!(
                "event=dispatch module=service status={} operation={} duration_ms={}",
                if result.is_success() { "ok" } else { "error" },
                operation,
                started_at.elapsed().as_millis()
            );
            completion(result);
        });

    match spawned {
        Ok(handle) => Ok(Dispatched { operation, handle }),
        Err(err) => {
            error!(
                "event=dispatch module=service status=error operation={} error_code=spawn_failed error={}",
                operation, err
            );
            Err(StoreError::Dispatch(err))
        }
    }
}

fn run_locked<T, E, Job>(ctx: &SharedContext, job: Job) -> OperationResult<T, E>
where
    E: From<StoreError>,
    Job: FnOnce(&Context) -> OperationResult<T, E>,
{
    let guard = match ctx.lock() {
        Ok(guard) => guard,
        Err(_) => return OperationResult::Failure(StoreError::ContextPoisoned.into()),
    };

    match panic::catch_unwind(AssertUnwindSafe(|| job(&guard))) {
        Ok(result) => result,
        Err(payload) => {
            if let Err(err) = guard.discard() {
                error!(
                    "event=dispatch module=service status=error error_code=discard_failed context_id={} error={}",
                    guard.context_id(),
                    err
                );
            }
            let message = panic_message(payload.as_ref());
            OperationResult::Failure(StoreError::WorkerPanicked(message).into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Reads every entity of kind `E` in the background.
pub fn read_all_async<E, F>(ctx: &SharedContext, completion: F) -> StoreResult<Dispatched>
where
    E: Entity,
    F: FnOnce(OperationResult<Vec<Managed<E>>, StoreError>) + Send + 'static,
{
    dispatch(
        "read_all",
        ctx,
        |ctx: &Context| OperationResult::from(SqliteEntityStore::<E>::new(ctx).read_all()),
        completion,
    )
}

/// Counts entities of kind `E` in the background.
pub fn count_async<E, F>(ctx: &SharedContext, completion: F) -> StoreResult<Dispatched>
where
    E: Entity,
    F: FnOnce(OperationResult<u64, StoreError>) + Send + 'static,
{
    dispatch(
        "count",
        ctx,
        |ctx: &Context| OperationResult::from(SqliteEntityStore::<E>::new(ctx).count()),
        completion,
    )
}

#[cfg(test)]
mod tests {
    use super::dispatch;
    use crate::db::Context;
    use crate::repo::entity_store::StoreError;
    use crate::service::result::OperationResult;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn completion_runs_on_worker_thread() {
        let ctx = Context::open_in_memory().unwrap().into_shared();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();

        let handle = dispatch(
            "probe",
            &ctx,
            |_ctx: &Context| OperationResult::<u8, StoreError>::Success(7),
            move |result| {
                tx.send((thread::current().id(), result.success())).unwrap();
            },
        )
        .unwrap();

        let (worker, value) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(worker, caller);
        assert_eq!(value, Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn panicking_job_reports_failure() {
        let ctx = Context::open_in_memory().unwrap().into_shared();
        let (tx, rx) = mpsc::channel();

        dispatch(
            "probe",
            &ctx,
            |_ctx: &Context| -> OperationResult<u8, StoreError> { panic!("job exploded") },
            move |result| tx.send(result).unwrap(),
        )
        .unwrap()
        .join()
        .unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            OperationResult::Failure(StoreError::WorkerPanicked(message)) => {
                assert!(message.contains("job exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(ctx.lock().is_ok());
    }
}
