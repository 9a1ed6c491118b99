//! Adapters that put the pooled proxies on top of existing pool crates.
//!
//! Each adapter implements [`ConnectionPool`](super::ConnectionPool) for the pool type
//! and [`Link`](crate::link::Link) for the pool's checkout guard, so returning a
//! connection is simply dropping the guard.

#[cfg(feature = "bb8")]
mod bb8;
#[cfg(feature = "deadpool")]
mod deadpool;

#[cfg(feature = "bb8")]
pub use self::bb8::Bb8Pool;
#[cfg(feature = "deadpool")]
pub use self::deadpool::DeadpoolPool;
