use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::pool::{ConnectionPool, LinkLease, PoolOptions};
use crate::results::QueryOutcome;
use crate::types::{ConnectionId, RowValues};

use super::affinity::StatementCache;
use super::sweeper::{Sweeper, sweep_and_dispose};

/// A prepared statement that runs on whichever pooled connection is free.
///
/// Each execution borrows a connection, reuses the handle already prepared on that
/// connection (or prepares one), and returns the connection under the same rules as
/// [`DatabasePool::query`](crate::pool::DatabasePool::query). A background sweep closes
/// handles that sat idle for longer than the configured threshold.
pub struct StatementPool<P: ConnectionPool> {
    pool: Arc<P>,
    cache: Arc<StatementCache>,
    max_idle_ms: Arc<AtomicU64>,
    interval: Duration,
    sweeper: Option<Sweeper>,
}

impl<P: ConnectionPool> StatementPool<P> {
    pub(crate) fn new(pool: Arc<P>, options: &PoolOptions, cache: StatementCache) -> Self {
        let cache = Arc::new(cache);
        let max_idle_ms = Arc::new(AtomicU64::new(duration_millis(options.max_idle_time())));
        let interval = options.sweep_interval();
        let sweeper = Sweeper::spawn(Arc::downgrade(&cache), Arc::clone(&max_idle_ms), interval);
        Self {
            pool,
            cache,
            max_idle_ms,
            interval,
            sweeper,
        }
    }

    /// Execute with `params` on any available connection.
    ///
    /// # Errors
    /// Returns the pool's checkout error, the driver's prepare error, or its execution
    /// error; the connection has already been returned when an error is reported.
    pub async fn execute(&self, params: &[RowValues]) -> Result<QueryOutcome, SqlPoolError> {
        let mut lease = LinkLease::acquire(&self.pool).await?;
        let statement = self.cache.resolve(lease.link()?).await?;
        let result = statement.execute(params).await?;
        drop(statement);
        Ok(lease.settle(result))
    }

    #[must_use]
    pub fn query(&self) -> &str {
        self.cache.query()
    }

    /// Whether the underlying pool still hands out connections.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.pool.is_alive()
    }

    /// Most recent use of any cached handle; `None` once every handle was evicted.
    #[must_use]
    pub fn last_used_at(&self) -> Option<Instant> {
        self.cache.last_used_at()
    }

    /// Connections that currently hold a prepared handle.
    #[must_use]
    pub fn cached_connections(&self) -> Vec<ConnectionId> {
        self.cache.connections()
    }

    /// Sweep the cache immediately, outside the regular schedule.
    ///
    /// Returns how many handles were removed.
    pub fn sweep_now(&self) -> usize {
        sweep_and_dispose(&self.cache, self.max_idle_time())
    }

    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms.load(Ordering::Relaxed))
    }

    /// Change the idle threshold; takes effect at the next sweep. Zero disables idle eviction.
    pub fn set_max_idle_time(&self, max_idle: Duration) {
        self.max_idle_ms
            .store(duration_millis(max_idle), Ordering::Relaxed);
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.interval
    }

    /// Restart the background sweep with a new interval. Zero stops it.
    pub fn set_sweep_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.sweeper = Sweeper::spawn(
            Arc::downgrade(&self.cache),
            Arc::clone(&self.max_idle_ms),
            interval,
        );
    }
}

impl<P: ConnectionPool> fmt::Debug for StatementPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementPool")
            .field("query", &self.cache.query())
            .field("connections", &self.cache.connections())
            .field("max_idle", &self.max_idle_time())
            .field("interval", &self.interval)
            .field("sweeping", &self.sweeper.is_some())
            .finish()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
