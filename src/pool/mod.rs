pub mod config;
pub mod connection;
pub mod database;
pub mod lease;
pub mod types;

pub use config::{PoolOptions, PoolOptionsBuilder};
#[cfg(feature = "bb8")]
pub use connection::Bb8Pool;
#[cfg(feature = "deadpool")]
pub use connection::DeadpoolPool;
pub use database::DatabasePool;
pub use lease::LinkLease;
pub use types::ConnectionPool;
