//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to build a pool, run queries,
//! and read results.

pub use crate::error::SqlPoolError;
pub use crate::link::{Cursor, Link, QueryResult, Statement, Transaction};
pub use crate::pool::{ConnectionPool, DatabasePool, PoolOptions, PoolOptionsBuilder};
pub use crate::results::{QueryOutcome, ResultCursor, Row};
pub use crate::statement::{PooledStatement, StatementPool};
pub use crate::transaction::{PooledTransaction, TxDropPolicy, TxState};
pub use crate::types::{CommandResult, ConnectionId, FetchStyle, IsolationLevel, RowValues};

#[cfg(feature = "bb8")]
pub use crate::pool::Bb8Pool;
#[cfg(feature = "deadpool")]
pub use crate::pool::DeadpoolPool;
