//! The driver-facing contract.
//!
//! A driver implements these traits for its connection, statement, cursor, and
//! transaction types. Handles returned by a [`Link`] (statements, cursors,
//! transactions) stay usable after the link is handed back to its pool: they carry
//! whatever shared state they need, the way a worker-backed connection handle does.
//! The pooled proxies decide *when* the link may be handed back.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::results::Row;
use crate::types::{CommandResult, ConnectionId, FetchStyle, IsolationLevel, RowValues};

/// Raw result of a query or execute call, before any pooling decision is made.
pub enum QueryResult {
    /// The statement produced no rows.
    Command(CommandResult),
    /// The statement produced a cursor, buffered or streaming.
    Rows(Box<dyn Cursor>),
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Command(result) => f.debug_tuple("Command").field(result).finish(),
            QueryResult::Rows(cursor) => f
                .debug_struct("Rows")
                .field("field_count", &cursor.field_count())
                .field("unbuffered", &cursor.is_unbuffered())
                .finish(),
        }
    }
}

/// A physical connection borrowed from the underlying pool.
#[async_trait]
pub trait Link: Send + Sync {
    /// Identity that stays the same across every borrow of this physical connection.
    fn connection_id(&self) -> ConnectionId;

    async fn query(&mut self, sql: &str) -> Result<QueryResult, SqlPoolError>;

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<QueryResult, SqlPoolError>;

    /// Prepare `sql` on this connection; the handle is only valid on this connection.
    async fn prepare(&mut self, sql: &str) -> Result<Arc<dyn Statement>, SqlPoolError>;

    async fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, SqlPoolError>;

    fn quote_string(&self, data: &str) -> String;

    fn quote_name(&self, name: &str) -> String;

    fn is_alive(&self) -> bool;

    fn last_used_at(&self) -> Instant;
}

/// A prepared statement bound to one physical connection.
#[async_trait]
pub trait Statement: Send + Sync {
    async fn execute(&self, params: &[RowValues]) -> Result<QueryResult, SqlPoolError>;

    /// The SQL text this statement was prepared from.
    fn query(&self) -> &str;

    fn is_alive(&self) -> bool;

    fn last_used_at(&self) -> Instant;

    /// Deallocate the statement on the server.
    async fn close(&self) -> Result<(), SqlPoolError>;
}

/// A result cursor. Buffered cursors are fully materialised; unbuffered ones still read
/// from their connection.
#[async_trait]
pub trait Cursor: Send {
    fn field_count(&self) -> usize;

    /// Next row, or `None` once the cursor is exhausted.
    async fn fetch(&mut self, style: FetchStyle) -> Result<Option<Row>, SqlPoolError>;

    /// Value of column `index` in the next row, or `None` once the cursor is exhausted.
    async fn fetch_column(&mut self, index: usize) -> Result<Option<RowValues>, SqlPoolError>;

    fn is_unbuffered(&self) -> bool;
}

/// An open transaction. All of its work runs on the connection that began it.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn query(&mut self, sql: &str) -> Result<QueryResult, SqlPoolError>;

    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<QueryResult, SqlPoolError>;

    async fn prepare(&mut self, sql: &str) -> Result<Arc<dyn Statement>, SqlPoolError>;

    fn isolation_level(&self) -> IsolationLevel;

    fn is_active(&self) -> bool;

    fn is_alive(&self) -> bool;

    fn last_used_at(&self) -> Instant;

    async fn commit(&mut self) -> Result<CommandResult, SqlPoolError>;

    async fn rollback(&mut self) -> Result<CommandResult, SqlPoolError>;

    async fn create_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError>;

    async fn rollback_to(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError>;

    async fn release_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError>;

    fn quote_string(&self, data: &str) -> String;

    fn quote_name(&self, name: &str) -> String;
}
