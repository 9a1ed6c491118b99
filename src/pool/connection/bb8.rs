use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::bb8::{ManageConnection, Pool, PooledConnection};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::{Link, QueryResult, Statement, Transaction};
use crate::pool::types::ConnectionPool;
use crate::types::{ConnectionId, IsolationLevel, RowValues};

/// [`ConnectionPool`] over a `bb8` pool whose manager produces [`Link`]s.
///
/// `bb8` has no explicit close, so closing only stops new checkouts through this adapter;
/// idle connections go away when the last clone of the `bb8::Pool` is dropped.
pub struct Bb8Pool<M: ManageConnection> {
    pool: Pool<M>,
    closed: AtomicBool,
}

impl<M: ManageConnection> Bb8Pool<M> {
    #[must_use]
    pub fn new(pool: Pool<M>) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &Pool<M> {
        &self.pool
    }
}

impl<M: ManageConnection> fmt::Debug for Bb8Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bb8Pool")
            .field("state", &self.pool.state())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl<M> ConnectionPool for Bb8Pool<M>
where
    M: ManageConnection,
    M::Connection: Link,
    M::Error: fmt::Display,
{
    type Connection = PooledConnection<'static, M>;

    async fn acquire(&self) -> Result<Self::Connection, SqlPoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlPoolError::PoolError("bb8 pool has been closed".into()));
        }
        Ok(self.pool.get_owned().await?)
    }

    fn release(&self, connection: Self::Connection) {
        drop(connection);
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl<M> Link for PooledConnection<'static, M>
where
    M: ManageConnection,
    M::Connection: Link,
{
    fn connection_id(&self) -> ConnectionId {
        (**self).connection_id()
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, SqlPoolError> {
        (**self).query(sql).await
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<QueryResult, SqlPoolError> {
        (**self).execute(sql, params).await
    }

    async fn prepare(&mut self, sql: &str) -> Result<Arc<dyn Statement>, SqlPoolError> {
        (**self).prepare(sql).await
    }

    async fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, SqlPoolError> {
        (**self).begin_transaction(isolation).await
    }

    fn quote_string(&self, data: &str) -> String {
        (**self).quote_string(data)
    }

    fn quote_name(&self, name: &str) -> String {
        (**self).quote_name(name)
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }

    fn last_used_at(&self) -> Instant {
        (**self).last_used_at()
    }
}
