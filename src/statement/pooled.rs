use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::Statement;
use crate::release::ReleaseGuard;
use crate::results::QueryOutcome;
use crate::types::RowValues;

/// A prepared statement that co-owns its connection's release.
///
/// The statement holds one reference from construction until it is dropped. Each
/// execution that yields a streaming cursor adds a reference held by that cursor, so
/// the connection goes back only once the statement and all of its cursors are done,
/// in whatever order that happens.
pub struct PooledStatement {
    statement: Arc<dyn Statement>,
    release: ReleaseGuard,
}

impl PooledStatement {
    /// Wrap `statement`, taking ownership of one reference on `release`.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ResourceDead` if the statement is already dead; the
    /// reference is released before the error is returned.
    pub fn new(statement: Arc<dyn Statement>, release: ReleaseGuard) -> Result<Self, SqlPoolError> {
        if !statement.is_alive() {
            release.release();
            return Err(SqlPoolError::ResourceDead(format!(
                "Statement is dead: {}",
                statement.query()
            )));
        }
        Ok(Self { statement, release })
    }

    /// Execute with `params`.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ResourceDead` if the handle died since it was prepared,
    /// otherwise the driver's error unchanged.
    pub async fn execute(&self, params: &[RowValues]) -> Result<QueryOutcome, SqlPoolError> {
        if !self.statement.is_alive() {
            return Err(SqlPoolError::ResourceDead(format!(
                "Statement is dead: {}",
                self.statement.query()
            )));
        }
        let result = self.statement.execute(params).await?;
        Ok(QueryOutcome::sharing(result, &self.release))
    }

    #[must_use]
    pub fn query(&self) -> &str {
        self.statement.query()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.statement.is_alive()
    }

    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.statement.last_used_at()
    }

    /// Drop the statement's own reference now.
    pub fn close(self) {
        drop(self);
    }
}

impl fmt::Debug for PooledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledStatement")
            .field("query", &self.statement.query())
            .field("release", &self.release)
            .finish()
    }
}
