use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::{Link, Statement};
use crate::types::ConnectionId;

/// Per-SQL-text map from physical connection to the statement prepared on it.
///
/// A prepared handle is only valid on the connection that prepared it, while any
/// connection may service the next execution. The cache keeps at most one handle per
/// connection and prepares lazily the first time a connection shows up.
///
/// The lock is never held across an `await`: a lookup and the following insert are two
/// separate critical sections, which is safe because the connection being resolved is
/// exclusively borrowed by the caller in between.
pub struct StatementCache {
    query: Arc<str>,
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

struct Entry {
    statement: Arc<dyn Statement>,
    // One extra strong count per outstanding `CachedStatement`. Private, so clones the
    // driver keeps of `statement` never make an entry look busy.
    in_use: Arc<()>,
}

impl Entry {
    fn new(statement: Arc<dyn Statement>) -> Self {
        Self {
            statement,
            in_use: Arc::new(()),
        }
    }

    fn checkout(&self) -> CachedStatement {
        CachedStatement {
            statement: Arc::clone(&self.statement),
            _in_use: Arc::clone(&self.in_use),
        }
    }

    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.in_use) > 1
    }
}

/// A cached handle checked out for one execution. The sweep leaves its entry alone
/// until this is dropped.
pub struct CachedStatement {
    statement: Arc<dyn Statement>,
    _in_use: Arc<()>,
}

impl Deref for CachedStatement {
    type Target = dyn Statement;

    fn deref(&self) -> &Self::Target {
        &*self.statement
    }
}

impl fmt::Debug for CachedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedStatement")
            .field("query", &self.statement.query())
            .finish_non_exhaustive()
    }
}

/// What one sweep removed.
#[derive(Default)]
pub struct SweepOutcome {
    /// Entries whose handle was already dead.
    pub dead: usize,
    /// Idle entries removed from the cache; they still need to be closed.
    pub idle: Vec<Arc<dyn Statement>>,
    /// Idle entries left alone because a caller is executing them.
    pub busy: usize,
}

impl SweepOutcome {
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.dead + self.idle.len()
    }
}

impl fmt::Debug for SweepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepOutcome")
            .field("dead", &self.dead)
            .field("idle", &self.idle.len())
            .field("busy", &self.busy)
            .finish()
    }
}

impl StatementCache {
    #[must_use]
    pub fn new(query: &str) -> Self {
        Self {
            query: Arc::from(query),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A cache that already knows the handle prepared on `connection`.
    #[must_use]
    pub fn seeded(query: &str, connection: ConnectionId, statement: Arc<dyn Statement>) -> Self {
        let cache = Self::new(query);
        cache.entries().insert(connection, Entry::new(statement));
        cache
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The handle for `link`, preparing one if the cache has none or only a dead one.
    ///
    /// Idle time is not considered here; only the sweep judges staleness.
    ///
    /// # Errors
    /// Returns the driver's prepare error.
    pub async fn resolve<L>(&self, link: &mut L) -> Result<CachedStatement, SqlPoolError>
    where
        L: Link + ?Sized,
    {
        let connection = link.connection_id();
        if let Some(statement) = self.lookup(connection) {
            return Ok(statement);
        }

        let entry = Entry::new(link.prepare(&self.query).await?);
        let statement = entry.checkout();
        self.entries().insert(connection, entry);
        tracing::debug!(%connection, query = %self.query, "prepared statement on connection");
        Ok(statement)
    }

    fn lookup(&self, connection: ConnectionId) -> Option<CachedStatement> {
        let mut entries = self.entries();
        match entries.get(&connection) {
            Some(entry) if entry.statement.is_alive() => Some(entry.checkout()),
            Some(_) => {
                entries.remove(&connection);
                tracing::debug!(%connection, query = %self.query, "dropped dead statement on lookup");
                None
            }
            None => None,
        }
    }

    /// Remove dead handles, and handles idle for at least `max_idle` as of `now`.
    ///
    /// A zero `max_idle` only removes dead handles. Handles a caller is currently
    /// executing are never removed for idleness.
    pub fn sweep(&self, now: Instant, max_idle: Duration) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut entries = self.entries();
        entries.retain(|connection, entry| {
            let statement = &entry.statement;
            if !statement.is_alive() {
                outcome.dead += 1;
                tracing::debug!(%connection, "evicting dead statement");
                return false;
            }
            if max_idle.is_zero() || statement.last_used_at() + max_idle > now {
                return true;
            }
            if entry.is_busy() {
                outcome.busy += 1;
                return true;
            }
            tracing::debug!(%connection, idle = ?now.saturating_duration_since(statement.last_used_at()), "evicting idle statement");
            outcome.idle.push(Arc::clone(statement));
            false
        });
        outcome
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries().contains_key(&connection)
    }

    /// Connections that currently hold a handle, in ascending id order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<_> = self.entries().keys().copied().collect();
        connections.sort_unstable();
        connections
    }

    /// Most recent use across every cached handle.
    #[must_use]
    pub fn last_used_at(&self) -> Option<Instant> {
        self.entries()
            .values()
            .map(|entry| entry.statement.last_used_at())
            .max()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("query", &self.query)
            .field("connections", &self.connections())
            .finish()
    }
}
