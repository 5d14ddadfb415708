//! Transaction scopes over a [`TagStore`]

use std::ops::Deref;

use rusqlite::Connection;

use super::connection::ConnectionHandle;
use super::store::TagStore;
use crate::{Error, Result, TransactionError};

/// An open write transaction on the calling thread's connection.
///
/// Every [`TagStore`] method called through the scope (it derefs to the
/// store) runs inside the transaction. Dropping the scope without
/// [`commit`](Self::commit) rolls everything back, including on panic.
pub struct TransactionScope<'a> {
    store: &'a TagStore,
    conn: ConnectionHandle,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    fn begin(store: &'a TagStore) -> Result<Self> {
        let conn = store.connections().get_connection()?;
        // Take the write lock up front; a deferred upgrade could fail without waiting
        conn.execute_batch("BEGIN IMMEDIATE")?;
        tracing::debug!("transaction started");
        Ok(Self {
            store,
            conn,
            finished: false,
        })
    }

    /// Make every change in the scope visible to other readers
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Discard every change made in the scope
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}

impl Deref for TransactionScope<'_> {
    type Target = TagStore;

    fn deref(&self) -> &TagStore {
        self.store
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::warn!("transaction scope dropped without commit, rolled back"),
            Err(err) => tracing::error!(error = %err, "failed to roll back abandoned transaction"),
        }
    }
}

impl TagStore {
    /// Open a transaction scope on the calling thread
    pub fn begin_transaction(&self) -> Result<TransactionScope<'_>> {
        TransactionScope::begin(self)
    }

    /// Run `f` atomically: commit when it returns `Ok`, roll back otherwise.
    ///
    /// A validation failure inside `f` comes back as
    /// [`Error::Transaction`] once the rollback is done; any other error is
    /// returned as is. A failing rollback is logged and never replaces the
    /// error from `f`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionScope<'_>) -> Result<T>,
    {
        let scope = self.begin_transaction()?;
        match f(&scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                match scope.rollback() {
                    Ok(()) => tracing::warn!(error = %err, "transaction rolled back"),
                    Err(rollback_err) => tracing::error!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "transaction failed and its rollback failed too"
                    ),
                }
                Err(match err {
                    Error::Validation(cause) => TransactionError::RolledBack(cause).into(),
                    other => other,
                })
            }
        }
    }
}

/// Run `f` inside a savepoint on `conn`, released on success and rolled
/// back on error. Outside a transaction the savepoint is the transaction.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    let result = f().and_then(|value| {
        conn.execute_batch(&format!("RELEASE {}", name))?;
        Ok(value)
    });
    if result.is_err() {
        if let Err(err) = conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name)) {
            tracing::error!(savepoint = name, error = %err, "failed to roll back savepoint");
        }
    }
    result
}
