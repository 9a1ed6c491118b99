use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values that can be stored in a database row or used as query parameters.
///
/// Every driver sees the same enum, so the proxies never branch on driver types:
/// ```rust
/// use sql_pooled::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        match self {
            RowValues::Int(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RowValues::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            RowValues::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Transaction isolation level requested from the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// `READ UNCOMMITTED`
    Uncommitted,
    /// `READ COMMITTED`
    #[default]
    Committed,
    /// `REPEATABLE READ`
    Repeatable,
    /// `SERIALIZABLE`
    Serializable,
}

impl IsolationLevel {
    /// SQL fragment drivers can splice into `BEGIN ... ISOLATION LEVEL`.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::Uncommitted => "READ UNCOMMITTED",
            IsolationLevel::Committed => "READ COMMITTED",
            IsolationLevel::Repeatable => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Row shape a cursor should produce; forwarded untouched to the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStyle {
    /// Positional values only
    Array,
    /// Values addressable by column name
    #[default]
    Assoc,
    /// Values addressable by column name, materialised as a JSON object
    Object,
}

/// Outcome of a statement that produced no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Rows inserted, updated, or deleted
    pub rows_affected: u64,
}

impl CommandResult {
    #[must_use]
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// Stable identity of one physical connection.
///
/// Drivers assign it when the connection is opened and keep it for the connection's
/// whole life, so every borrow of the same physical connection reports the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a process-unique id for a freshly opened connection.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
