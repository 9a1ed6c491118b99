//! Connection-pooling proxies for SQL drivers.
//!
//! A [`DatabasePool`] borrows a connection from an underlying pool for every top-level
//! call and gives it back as soon as nothing still reads from it. Streaming cursors,
//! prepared statements, and transactions keep their connection through a shared
//! [`ReleaseGuard`], so the connection goes back exactly once, after the last of them
//! is done.
//!
//! Drivers plug in by implementing the traits in [`link`]; underlying pools plug in
//! through [`ConnectionPool`], with adapters for `bb8` and `deadpool`.

pub mod error;
pub mod link;
pub mod pool;
pub mod prelude;
pub mod release;
pub mod results;
pub mod statement;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::SqlPoolError;
pub use link::{Cursor, Link, QueryResult, Statement, Transaction};
#[cfg(feature = "bb8")]
pub use pool::Bb8Pool;
#[cfg(feature = "deadpool")]
pub use pool::DeadpoolPool;
pub use pool::{ConnectionPool, DatabasePool, LinkLease, PoolOptions, PoolOptionsBuilder};
pub use release::ReleaseGuard;
pub use results::{QueryOutcome, ResultCursor, Row};
pub use statement::{
    CachedStatement, PooledStatement, StatementCache, StatementPool, SweepOutcome,
};
pub use transaction::{PooledTransaction, TxDropPolicy, TxState};
pub use types::{CommandResult, ConnectionId, FetchStyle, IsolationLevel, RowValues};
