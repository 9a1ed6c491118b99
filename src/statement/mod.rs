//! Prepared statements: the per-transaction proxy and the pool-wide statement with its
//! per-connection affinity cache.

mod affinity;
mod pool;
mod pooled;
mod sweeper;

pub use affinity::{CachedStatement, StatementCache, SweepOutcome};
pub use pool::StatementPool;
pub use pooled::PooledStatement;
