use std::fmt;

use crate::error::SqlPoolError;
use crate::link::{Cursor, QueryResult};
use crate::release::ReleaseGuard;
use crate::types::{CommandResult, FetchStyle, RowValues};

use super::row::Row;

/// Cursor handed to application code.
///
/// An unbuffered cursor keeps one reference on the release obligation of the connection
/// it streams from. The reference is dropped the first time the cursor reports the end
/// of data, raises an error, or is closed; after that every fetch returns `None` without
/// touching the driver again. A buffered cursor holds no reference at all.
pub struct ResultCursor {
    cursor: Box<dyn Cursor>,
    release: Option<ReleaseGuard>,
    terminal: bool,
}

impl ResultCursor {
    /// Wrap a cursor that needs no connection.
    pub(crate) fn detached(cursor: Box<dyn Cursor>) -> Self {
        Self {
            cursor,
            release: None,
            terminal: false,
        }
    }

    /// Wrap a streaming cursor that co-owns `release`.
    pub(crate) fn pinned(cursor: Box<dyn Cursor>, release: ReleaseGuard) -> Self {
        Self {
            cursor,
            release: Some(release),
            terminal: false,
        }
    }

    /// Wrap `cursor`, taking a new reference on `release` only when it streams.
    pub(crate) fn sharing(cursor: Box<dyn Cursor>, release: &ReleaseGuard) -> Self {
        if cursor.is_unbuffered() {
            Self::pinned(cursor, release.share())
        } else {
            Self::detached(cursor)
        }
    }

    /// Fetch the next row.
    ///
    /// # Errors
    /// Returns the driver's error unchanged; the connection reference is dropped first.
    pub async fn fetch(&mut self, style: FetchStyle) -> Result<Option<Row>, SqlPoolError> {
        if self.terminal {
            return Ok(None);
        }
        match self.cursor.fetch(style).await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }

    /// Fetch a single column of the next row.
    ///
    /// # Errors
    /// Returns the driver's error unchanged; the connection reference is dropped first.
    pub async fn fetch_column(&mut self, index: usize) -> Result<Option<RowValues>, SqlPoolError> {
        if self.terminal {
            return Ok(None);
        }
        match self.cursor.fetch_column(index).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }

    /// Drain the cursor. This is the one call guaranteed to give the connection back.
    ///
    /// # Errors
    /// Returns the first fetch error; rows read before it are discarded.
    pub async fn fetch_all(&mut self, style: FetchStyle) -> Result<Vec<Row>, SqlPoolError> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch(style).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Stop reading and drop the connection reference without draining.
    pub fn close(&mut self) {
        self.finish();
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.cursor.field_count()
    }

    #[must_use]
    pub fn is_unbuffered(&self) -> bool {
        self.cursor.is_unbuffered()
    }

    #[must_use]
    pub fn is_buffered(&self) -> bool {
        !self.cursor.is_unbuffered()
    }

    /// `true` once the cursor is exhausted, failed, or closed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// `true` while this cursor still keeps a connection borrowed.
    #[must_use]
    pub fn holds_connection(&self) -> bool {
        self.release.is_some()
    }

    fn finish(&mut self) {
        self.terminal = true;
        if let Some(release) = self.release.take() {
            tracing::trace!(remaining = release.references() - 1, "cursor finished, dropping connection reference");
            release.release();
        }
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("field_count", &self.cursor.field_count())
            .field("unbuffered", &self.cursor.is_unbuffered())
            .field("terminal", &self.terminal)
            .field("holds_connection", &self.release.is_some())
            .finish()
    }
}

/// What application code gets back from `query` / `execute`.
#[derive(Debug)]
pub enum QueryOutcome {
    /// The statement produced no rows.
    Command(CommandResult),
    /// The statement produced rows.
    Rows(ResultCursor),
}

impl QueryOutcome {
    /// Wrap a raw driver result, sharing `release` with a streaming cursor.
    pub(crate) fn sharing(result: QueryResult, release: &ReleaseGuard) -> Self {
        match result {
            QueryResult::Command(command) => QueryOutcome::Command(command),
            QueryResult::Rows(cursor) => QueryOutcome::Rows(ResultCursor::sharing(cursor, release)),
        }
    }

    /// Rows affected for a command result, `None` for a cursor.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            QueryOutcome::Command(command) => Some(command.rows_affected),
            QueryOutcome::Rows(_) => None,
        }
    }

    #[must_use]
    pub fn into_cursor(self) -> Option<ResultCursor> {
        match self {
            QueryOutcome::Rows(cursor) => Some(cursor),
            QueryOutcome::Command(_) => None,
        }
    }

    /// `true` while the outcome keeps its connection borrowed.
    #[must_use]
    pub fn holds_connection(&self) -> bool {
        matches!(self, QueryOutcome::Rows(cursor) if cursor.holds_connection())
    }
}
