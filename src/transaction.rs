//! Transaction handles and the `Commit(v) | Rollback(v)` outcome body
//! closures return.
//!
//! The source driver's `transaction` passes a closure that returns
//! `Commit(v) | Rollback(v) | Ok(v)` (design notes, "Callback-shaped
//! transactions"). A typed port collapses the bare-`Ok(v)` case into
//! `Commit(v)` - callers state their intent explicitly - and lets the
//! "exception" path fall out of `body`'s own `Result`, which is what `?`
//! already gives you inside the closure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::prepared::PreparedStatement;
use crate::protocol::result::QueryResult;
use crate::protocol::value::Value;

/// What a transaction body decides to do with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome<T, R = T> {
    Commit(T),
    Rollback(R),
}

/// The error type of [`Connection::transaction`]: either a driver-level
/// failure (including the exception path, where `body` itself returned
/// `Err`) or an explicit rollback payload.
#[derive(Debug)]
pub enum TxError<R> {
    Driver(Error),
    Rolled(R),
}

impl<R> TxError<R> {
    pub fn rolled(self) -> Option<R> {
        match self {
            TxError::Rolled(r) => Some(r),
            TxError::Driver(_) => None,
        }
    }

    pub fn driver(self) -> Option<Error> {
        match self {
            TxError::Driver(e) => Some(e),
            TxError::Rolled(_) => None,
        }
    }
}

impl<R> From<Error> for TxError<R> {
    fn from(err: Error) -> Self {
        TxError::Driver(err)
    }
}

fn generate_tx_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("tx-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// A handle scoped to one `start transaction` .. `commit`/`rollback` span.
/// Named prepared statements created with [`Transaction::prepare`] are owned
/// here rather than in a pool-wide keyed map: a `Connection` is exclusively
/// checked out for the whole span (see the pool's checkout invariant), so
/// there is no concurrent access to guard against.
pub struct Transaction<'c> {
    pub(crate) connection: &'c mut Connection,
    id: String,
    statements: HashMap<String, PreparedStatement>,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(connection: &'c mut Connection) -> Self {
        Self {
            connection,
            id: generate_tx_id(),
            statements: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.connection.query(sql)
    }

    pub fn query_with_args(&mut self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        self.connection.query_with_args(sql, args)
    }

    /// Prepares `sql` under `name`, replacing any statement already cached
    /// under that name in this transaction.
    pub fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        let stmt = PreparedStatement::new(self.connection.framer_mut(), sql)?;
        if let Some(previous) = self.statements.insert(name.to_string(), stmt) {
            match previous.close(self.connection.framer_mut()) {
                Ok(()) => {}
                Err(err) if err.is_connection_fatal() => self.connection.poison(),
                Err(_) => {}
            }
        }
        Ok(())
    }

    pub fn exec_prepared(&mut self, name: &str, args: &[Value]) -> Result<QueryResult> {
        let stmt = self
            .statements
            .get(name)
            .ok_or_else(|| Error::Client(format!("no prepared statement named '{name}' in this transaction")))?;
        stmt.exec(self.connection.framer_mut(), args)
    }

    fn deallocate_all(&mut self) {
        for (_, stmt) in self.statements.drain() {
            match stmt.close(self.connection.framer_mut()) {
                Ok(()) => {}
                Err(err) if err.is_connection_fatal() => self.connection.poison(),
                Err(_) => {}
            }
        }
    }
}

/// Runs `body` under `start transaction`, guarding it with [`std::panic::catch_unwind`]
/// so a panicking body still rolls back and poisons the connection before
/// `Transaction` is dropped and the slot is checked back into the pool -
/// otherwise the unwind would skip straight past `finish` and hand the next
/// caller a connection stuck inside someone else's open transaction.
pub(crate) fn run<T, R>(
    connection: &mut Connection,
    body: impl FnOnce(&mut Transaction) -> Result<TxOutcome<T, R>>,
) -> std::result::Result<T, TxError<R>> {
    connection.query("start transaction")?;

    let mut tx = Transaction::new(connection);
    let panic_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(&mut tx)));
    tx.deallocate_all();

    let body_result = match panic_result {
        Ok(result) => result,
        Err(payload) => {
            tracing::error!("transaction body panicked; rolling back and poisoning connection");
            let _ = finish(&mut tx, false);
            tx.connection.poison();
            std::panic::resume_unwind(payload);
        }
    };

    match body_result {
        Err(err) => {
            let _ = finish(&mut tx, false);
            Err(TxError::Driver(err))
        }
        Ok(TxOutcome::Commit(value)) => {
            finish(&mut tx, true)?;
            Ok(value)
        }
        Ok(TxOutcome::Rollback(reason)) => {
            finish(&mut tx, false)?;
            Err(TxError::Rolled(reason))
        }
    }
}

fn finish(tx: &mut Transaction, commit: bool) -> Result<()> {
    let command = if commit { "commit" } else { "rollback" };
    let result = tx.connection.query(command).map(|_| ());
    if let Err(err) = &result {
        if err.is_connection_fatal() {
            tx.connection.poison();
        }
    }
    result
}
