//! Transaction-scoped execution.
//!
//! Planning reads catalog metadata, and the engine requires every catalog touched by
//! a query to be registered with the query's transaction first. The optimizer does not
//! manage transactions; it only runs closures inside a scope supplied by the caller.

use crate::error::{OptimizerError, OptimizerResult};
use crate::session::Session;
use tracing::debug;

pub trait TransactionScope: Send + Sync {
    /// Start a transaction for `session` and register `catalogs` with it. Returns the
    /// session the closure should run with.
    fn begin(&self, session: &Session, catalogs: &[String]) -> OptimizerResult<Session>;

    fn finish(&self, session: &Session) -> OptimizerResult<()>;

    fn abort(&self, _session: &Session) -> OptimizerResult<()> {
        Ok(())
    }
}

/// Scope for tests and the command line: assigns a transaction id and records the
/// registered catalogs on the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionScope;

impl TransactionScope for NoopTransactionScope {
    fn begin(&self, session: &Session, catalogs: &[String]) -> OptimizerResult<Session> {
        if session.transaction_id.is_some() {
            return Err(OptimizerError::Transaction(format!(
                "query {} already runs in a transaction",
                session.query_id
            )));
        }
        let mut scoped = session.clone();
        scoped.transaction_id = Some(format!("txn-{}", session.query_id));
        scoped.registered_catalogs.extend(session.catalog.iter().cloned());
        scoped.registered_catalogs.extend(catalogs.iter().cloned());
        Ok(scoped)
    }

    fn finish(&self, _session: &Session) -> OptimizerResult<()> {
        Ok(())
    }
}

/// Run `f` with a session prepared by `scope`. The transaction is finished when `f`
/// succeeds and aborted when it fails; the closure's error wins over an abort error.
pub fn run_in_transaction<T, F>(
    scope: &dyn TransactionScope,
    session: &Session,
    catalogs: &[String],
    f: F,
) -> OptimizerResult<T>
where
    F: FnOnce(&Session) -> OptimizerResult<T>,
{
    let scoped = scope.begin(session, catalogs)?;
    debug!(
        "Began transaction {:?} for query {} with catalogs {:?}",
        scoped.transaction_id, scoped.query_id, scoped.registered_catalogs
    );
    match f(&scoped) {
        Ok(value) => {
            scope.finish(&scoped)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = scope.abort(&scoped) {
                debug!("Abort of query {} failed: {}", scoped.query_id, abort_err);
            }
            Err(err)
        }
    }
}
