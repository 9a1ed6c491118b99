use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SqlPoolError;
use crate::link::Link;
use crate::results::QueryOutcome;
use crate::statement::{StatementCache, StatementPool};
use crate::transaction::PooledTransaction;
use crate::types::{IsolationLevel, RowValues};

use super::config::{PoolOptions, validate_sweep_interval};
use super::lease::LinkLease;
use super::types::ConnectionPool;

/// Entry point for application code.
///
/// Every top-level call borrows a connection from the underlying pool and gives it back
/// as soon as nothing still reads from it. Cloning is cheap; clones share the
/// underlying pool but carry their own options.
pub struct DatabasePool<P: ConnectionPool> {
    pool: Arc<P>,
    options: PoolOptions,
}

impl<P: ConnectionPool> Clone for DatabasePool<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            options: self.options.clone(),
        }
    }
}

impl<P: ConnectionPool> fmt::Debug for DatabasePool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabasePool")
            .field("options", &self.options)
            .field("alive", &self.pool.is_alive())
            .finish()
    }
}

impl<P: ConnectionPool> DatabasePool<P> {
    #[must_use]
    pub fn new(pool: P, options: PoolOptions) -> Self {
        Self::from_arc(Arc::new(pool), options)
    }

    /// Build on a pool that is shared with other owners.
    #[must_use]
    pub fn from_arc(pool: Arc<P>, options: PoolOptions) -> Self {
        Self { pool, options }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn inner(&self) -> &Arc<P> {
        &self.pool
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    #[must_use]
    pub fn statement_max_idle_time(&self) -> Duration {
        self.options.max_idle_time()
    }

    /// Idle threshold for statements prepared from now on, in seconds (0 = never evict).
    pub fn set_statement_max_idle_time(&mut self, seconds: u64) {
        self.options.statement_max_idle_time = seconds;
    }

    #[must_use]
    pub fn statement_sweep_interval(&self) -> Duration {
        self.options.sweep_interval()
    }

    /// Sweep interval for statements prepared from now on (0 = no sweeping).
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConfigError` if `seconds` is negative.
    pub fn set_statement_sweep_interval(&mut self, seconds: f64) -> Result<(), SqlPoolError> {
        validate_sweep_interval(seconds)?;
        self.options.statement_sweep_interval = seconds;
        Ok(())
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.pool.is_alive()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run `sql` without parameters.
    ///
    /// # Errors
    /// Returns the pool's checkout error or the driver's error unchanged; the connection
    /// has already been returned when an error is reported.
    pub async fn query(&self, sql: &str) -> Result<QueryOutcome, SqlPoolError> {
        let mut lease = LinkLease::acquire(&self.pool).await?;
        let result = lease.link()?.query(sql).await?;
        Ok(lease.settle(result))
    }

    /// Run `sql` with bound parameters.
    ///
    /// # Errors
    /// Returns the pool's checkout error or the driver's error unchanged; the connection
    /// has already been returned when an error is reported.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<QueryOutcome, SqlPoolError> {
        let mut lease = LinkLease::acquire(&self.pool).await?;
        let result = lease.link()?.execute(sql, params).await?;
        Ok(lease.settle(result))
    }

    /// Prepare `sql` and return a statement that can run on any pooled connection.
    ///
    /// The connection is returned right after preparing; the handle seeds the
    /// statement's own affinity cache.
    ///
    /// # Errors
    /// Returns the pool's checkout error or the driver's prepare error.
    pub async fn prepare(&self, sql: &str) -> Result<StatementPool<P>, SqlPoolError> {
        let mut lease = LinkLease::acquire(&self.pool).await?;
        let link = lease.link()?;
        let statement = link.prepare(sql).await?;
        let connection = link.connection_id();
        lease.give_back();

        let cache = StatementCache::seeded(sql, connection, statement);
        Ok(StatementPool::new(Arc::clone(&self.pool), &self.options, cache))
    }

    /// Begin a transaction; its connection stays borrowed until commit or rollback.
    ///
    /// # Errors
    /// Returns the pool's checkout error, the driver's error, or
    /// `SqlPoolError::TransactionStateError` if the driver reports the new transaction
    /// as already inactive.
    pub async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<PooledTransaction, SqlPoolError> {
        let mut lease = LinkLease::acquire(&self.pool).await?;
        let transaction = lease.link()?.begin_transaction(isolation).await?;
        PooledTransaction::begin(
            transaction,
            lease.into_release_guard(),
            self.options.transaction_drop_policy,
        )
    }
}
