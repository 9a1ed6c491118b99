use std::fmt;
use std::sync::Arc;

use ::deadpool::managed::{Manager, Object, Pool};
use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::{Link, QueryResult, Statement, Transaction};
use crate::pool::types::ConnectionPool;
use crate::types::{ConnectionId, IsolationLevel, RowValues};

/// [`ConnectionPool`] over a `deadpool` managed pool whose objects are [`Link`]s.
pub struct DeadpoolPool<M: Manager> {
    pool: Pool<M>,
}

impl<M: Manager> DeadpoolPool<M> {
    #[must_use]
    pub fn new(pool: Pool<M>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn inner(&self) -> &Pool<M> {
        &self.pool
    }
}

impl<M: Manager> fmt::Debug for DeadpoolPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.pool.status();
        f.debug_struct("DeadpoolPool")
            .field("size", &status.size)
            .field("available", &status.available)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

#[async_trait]
impl<M> ConnectionPool for DeadpoolPool<M>
where
    M: Manager + 'static,
    M::Type: Link,
    M::Error: fmt::Display,
{
    type Connection = Object<M>;

    async fn acquire(&self) -> Result<Self::Connection, SqlPoolError> {
        Ok(self.pool.get().await?)
    }

    fn release(&self, connection: Self::Connection) {
        drop(connection);
    }

    fn is_alive(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl<M> Link for Object<M>
where
    M: Manager + 'static,
    M::Type: Link,
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
