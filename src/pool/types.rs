use async_trait::async_trait;

use crate::error::SqlPoolError;
use crate::link::Link;

/// The underlying connection pool this crate sits on top of.
///
/// Sizing, validation, queueing, and timeouts all belong to the implementation; the
/// proxies only ever borrow a connection and give it back exactly once.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Link + 'static;

    /// Borrow a connection, waiting if the pool is exhausted.
    ///
    /// # Errors
    /// Returns `SqlPoolError` if no connection can be produced.
    async fn acquire(&self) -> Result<Self::Connection, SqlPoolError>;

    /// Give a borrowed connection back. Synchronous so that drop paths can call it.
    fn release(&self, connection: Self::Connection);

    fn is_alive(&self) -> bool;

    /// Close the pool; later `acquire` calls fail.
    async fn close(&self);
}
