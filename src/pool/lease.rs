use std::fmt;
use std::sync::Arc;

use crate::error::SqlPoolError;
use crate::link::{Link, QueryResult};
use crate::release::ReleaseGuard;
use crate::results::{QueryOutcome, ResultCursor};

use super::types::ConnectionPool;

/// A connection borrowed for one top-level operation.
///
/// Dropping the lease returns the connection, so every early return, `?`, and
/// cancelled future gives it back. When the operation's result still needs the
/// connection, the lease is converted into a [`ReleaseGuard`] instead.
pub struct LinkLease<P: ConnectionPool> {
    pool: Arc<P>,
    conn: Option<P::Connection>,
}

impl<P: ConnectionPool> LinkLease<P> {
    /// Borrow a connection from `pool`.
    ///
    /// # Errors
    /// Propagates the underlying pool's checkout error.
    pub async fn acquire(pool: &Arc<P>) -> Result<Self, SqlPoolError> {
        let conn = pool.acquire().await?;
        tracing::trace!(connection = %conn.connection_id(), "borrowed connection");
        Ok(Self {
            pool: Arc::clone(pool),
            conn: Some(conn),
        })
    }

    /// The borrowed connection.
    ///
    /// # Errors
    /// Returns `SqlPoolError::Other` if the connection was already handed back.
    pub fn link(&mut self) -> Result<&mut P::Connection, SqlPoolError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SqlPoolError::Other("connection already returned to the pool".into()))
    }

    /// Hand the connection back to the pool now.
    pub fn give_back(self) {
        drop(self);
    }

    /// Turn the lease into the first reference of a release obligation.
    #[must_use]
    pub fn into_release_guard(mut self) -> ReleaseGuard {
        let pool = Arc::clone(&self.pool);
        let conn = self.conn.take();
        ReleaseGuard::new(move || {
            if let Some(conn) = conn {
                tracing::trace!(connection = %conn.connection_id(), "returning connection after last reference");
                pool.release(conn);
            }
        })
    }

    /// Decide what happens to the connection once a query has produced `result`.
    ///
    /// A streaming cursor keeps the connection until it finishes; everything else gives
    /// the connection back before the caller sees the result.
    #[must_use]
    pub fn settle(self, result: QueryResult) -> QueryOutcome {
        match result {
            QueryResult::Rows(cursor) if cursor.is_unbuffered() => {
                QueryOutcome::Rows(ResultCursor::pinned(cursor, self.into_release_guard()))
            }
            QueryResult::Rows(cursor) => {
                self.give_back();
                QueryOutcome::Rows(ResultCursor::detached(cursor))
            }
            QueryResult::Command(command) => {
                self.give_back();
                QueryOutcome::Command(command)
            }
        }
    }
}

impl<P: ConnectionPool> Drop for LinkLease<P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!(connection = %conn.connection_id(), "returning connection");
            self.pool.release(conn);
        }
    }
}

impl<P: ConnectionPool> fmt::Debug for LinkLease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkLease")
            .field("connection", &self.conn.as_ref().map(|conn| conn.connection_id()))
            .finish()
    }
}
