use thiserror::Error;

#[cfg(feature = "bb8")]
use bb8;

#[cfg(feature = "deadpool")]
use deadpool;

#[derive(Debug, Error)]
pub enum SqlPoolError {
    /// The transport to the database was lost; the connection must still go back to the
    /// underlying pool so it can be discarded or replaced.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{}", with_query(message, query.as_deref()))]
    QueryError {
        message: String,
        query: Option<String>,
    },

    #[error("{}", with_query(message, query.as_deref()))]
    QueryExecutionError {
        message: String,
        diagnostics: Vec<(String, String)>,
        query: Option<String>,
    },

    #[error("Transaction error: {0}")]
    TransactionStateError(String),

    #[error("Resource dead: {0}")]
    ResourceDead(String),

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

fn with_query(message: &str, query: Option<&str>) -> String {
    match query {
        Some(sql) if !sql.is_empty() => format!("{message}\nCurrent query was {sql}"),
        _ => message.to_string(),
    }
}

impl SqlPoolError {
    /// Build a [`SqlPoolError::QueryError`] that remembers the offending SQL.
    pub fn query_error(message: impl Into<String>, query: impl Into<String>) -> Self {
        SqlPoolError::QueryError {
            message: message.into(),
            query: Some(query.into()),
        }
    }

    pub(crate) fn transaction_finished() -> Self {
        SqlPoolError::TransactionStateError(
            "The transaction has been committed or rolled back".into(),
        )
    }

    /// `true` when the connection that produced this error is no longer usable.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SqlPoolError::ConnectionError(_))
    }

    /// SQL text attached to a query failure, if the driver reported one.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        match self {
            SqlPoolError::QueryError { query, .. }
            | SqlPoolError::QueryExecutionError { query, .. } => query.as_deref(),
            _ => None,
        }
    }

    /// Server diagnostics for an execution failure; empty for every other kind.
    #[must_use]
    pub fn diagnostics(&self) -> &[(String, String)] {
        match self {
            SqlPoolError::QueryExecutionError { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

#[cfg(feature = "bb8")]
impl<E: std::fmt::Display> From<bb8::RunError<E>> for SqlPoolError {
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::User(e) => SqlPoolError::ConnectionError(format!("bb8 checkout error: {e}")),
            bb8::RunError::TimedOut => {
                SqlPoolError::PoolError("timed out waiting for a bb8 connection".into())
            }
        }
    }
}

#[cfg(feature = "deadpool")]
impl<E: std::fmt::Display> From<deadpool::managed::PoolError<E>> for SqlPoolError {
    fn from(err: deadpool::managed::PoolError<E>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(e) => {
                SqlPoolError::ConnectionError(format!("deadpool checkout error: {e}"))
            }
            other => SqlPoolError::PoolError(format!("deadpool error: {other}")),
        }
    }
}
