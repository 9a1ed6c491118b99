//! In-memory driver and pool.
//!
//! Nothing here talks to a database. Connections answer SQL by convention:
//!
//! - text containing `LOST` fails with [`SqlPoolError::ConnectionError`]
//! - text containing `FAIL` fails with [`SqlPoolError::QueryError`]
//! - text starting with `SELECT` yields a cursor of `rows_per_select` rows with columns
//!   `id` and `label`
//! - anything else is a command affecting one row
//!
//! The pool counts every checkout and return so tests can assert that nothing leaks and
//! nothing is returned twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::{Cursor, Link, QueryResult, Statement, Transaction};
use crate::pool::ConnectionPool;
use crate::results::{Row, index_columns};
use crate::types::{CommandResult, ConnectionId, FetchStyle, IsolationLevel, RowValues};

/// Switches that change how memory connections answer.
#[derive(Debug, Clone)]
pub struct MemoryBehavior {
    /// `SELECT` results stream from the connection instead of being buffered.
    pub unbuffered: bool,
    pub rows_per_select: usize,
    /// `prepare` hands back statements that are already dead.
    pub prepare_dead: bool,
    /// `prepare` on a connection fails regardless of the SQL text.
    pub fail_prepare: bool,
    /// `begin_transaction` hands back a transaction that is not active.
    pub begin_inactive: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    /// Closing a statement reports an error.
    pub fail_close: bool,
    /// Cursors fail after yielding this many rows.
    pub fail_fetch_after: Option<usize>,
}

impl Default for MemoryBehavior {
    fn default() -> Self {
        Self {
            unbuffered: false,
            rows_per_select: 3,
            prepare_dead: false,
            fail_prepare: false,
            begin_inactive: false,
            fail_commit: false,
            fail_rollback: false,
            fail_close: false,
            fail_fetch_after: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    double_releases: AtomicUsize,
    connections_created: AtomicUsize,
    prepares: AtomicUsize,
    executions: AtomicUsize,
    statements_closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

struct Shared {
    behavior: Mutex<MemoryBehavior>,
    counters: Counters,
    statements: Mutex<Vec<Weak<MemoryStatement>>>,
}

impl Shared {
    fn behavior(&self) -> MemoryBehavior {
        self.behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn answer(&self, sql: &str) -> Result<QueryResult, SqlPoolError> {
        if sql.contains("LOST") {
            return Err(SqlPoolError::ConnectionError(format!(
                "server closed the connection while running: {sql}"
            )));
        }
        if sql.contains("FAIL") {
            return Err(SqlPoolError::query_error("syntax error", sql));
        }
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            let behavior = self.behavior();
            return Ok(QueryResult::Rows(Box::new(MemoryCursor::new(
                behavior.rows_per_select,
                behavior.unbuffered,
                behavior.fail_fetch_after,
            ))));
        }
        Ok(QueryResult::Command(CommandResult::new(1)))
    }
}

/// Bounded pool of [`MemoryLink`]s.
///
/// Idle connections are reused in the order they were returned, so tests can predict
/// which physical connection serves a call.
#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<Shared>,
    idle: Arc<Mutex<VecDeque<MemoryLink>>>,
    borrowed: Arc<Mutex<HashSet<ConnectionId>>>,
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    max_size: usize,
}

impl MemoryPool {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self::with_behavior(max_size, MemoryBehavior::default())
    }

    #[must_use]
    pub fn with_behavior(max_size: usize, behavior: MemoryBehavior) -> Self {
        Self {
            shared: Arc::new(Shared {
                behavior: Mutex::new(behavior),
                counters: Counters::default(),
                statements: Mutex::new(Vec::new()),
            }),
            idle: Arc::new(Mutex::new(VecDeque::new())),
            borrowed: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(max_size)),
            closed: Arc::new(AtomicBool::new(false)),
            max_size,
        }
    }

    /// Change behavior for everything that happens from now on.
    pub fn configure(&self, change: impl FnOnce(&mut MemoryBehavior)) {
        change(&mut self.shared.behavior.lock().unwrap_or_else(PoisonError::into_inner));
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Connections currently checked out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        lock(&self.borrowed).len()
    }

    #[must_use]
    pub fn idle_connections(&self) -> Vec<ConnectionId> {
        lock(&self.idle).iter().map(|conn| conn.id).collect()
    }

    #[must_use]
    pub fn acquired_total(&self) -> usize {
        self.shared.counters.acquired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released_total(&self) -> usize {
        self.shared.counters.released.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn double_releases(&self) -> usize {
        self.shared.counters.double_releases.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_created(&self) -> usize {
        self.shared.counters.connections_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn prepares(&self) -> usize {
        self.shared.counters.prepares.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn executions(&self) -> usize {
        self.shared.counters.executions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn statements_closed(&self) -> usize {
        self.shared.counters.statements_closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Statements prepared so far that are still referenced somewhere, in preparation
    /// order. The pool itself only keeps weak references.
    #[must_use]
    pub fn statements(&self) -> Vec<Arc<MemoryStatement>> {
        lock(&self.shared.statements)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Mark every live statement prepared on `connection` as dead.
    pub fn kill_statements_on(&self, connection: ConnectionId) {
        for statement in self.statements() {
            if statement.connection == connection {
                statement.kill();
            }
        }
    }

    fn checkout(&self) -> MemoryLink {
        let conn = lock(&self.idle).pop_front().unwrap_or_else(|| {
            self.shared
                .counters
                .connections_created
                .fetch_add(1, Ordering::SeqCst);
            MemoryLink::new(Arc::clone(&self.shared))
        });
        lock(&self.borrowed).insert(conn.id);
        self.shared.counters.acquired.fetch_add(1, Ordering::SeqCst);
        conn
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("max_size", &self.max_size)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryLink;

    async fn acquire(&self) -> Result<MemoryLink, SqlPoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SqlPoolError::PoolError("memory pool has been closed".into()));
        }
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SqlPoolError::PoolError("memory pool has been closed".into()))?;
        permit.forget();
        Ok(self.checkout())
    }

    fn release(&self, connection: MemoryLink) {
        if !lock(&self.borrowed).remove(&connection.id) {
            self.shared
                .counters
                .double_releases
                .fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.shared.counters.released.fetch_add(1, Ordering::SeqCst);
        lock(&self.idle).push_back(connection);
        self.permits.add_permits(1);
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        lock(&self.idle).clear();
    }
}

/// One in-memory connection.
pub struct MemoryLink {
    id: ConnectionId,
    shared: Arc<Shared>,
    last_used: Instant,
}

impl MemoryLink {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            id: ConnectionId::next(),
            shared,
            last_used: Instant::now(),
        }
    }
}

impl fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLink").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Link for MemoryLink {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, SqlPoolError> {
        self.last_used = Instant::now();
        self.shared.answer(sql)
    }

    async fn execute(
        &mut self,
        sql: &str,
        _params: &[RowValues],
    ) -> Result<QueryResult, SqlPoolError> {
        self.last_used = Instant::now();
        self.shared.answer(sql)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Arc<dyn Statement>, SqlPoolError> {
        self.last_used = Instant::now();
        if sql.contains("FAIL") || self.shared.behavior().fail_prepare {
            return Err(SqlPoolError::query_error("cannot prepare", sql));
        }
        self.shared.counters.prepares.fetch_add(1, Ordering::SeqCst);
        let statement = Arc::new(MemoryStatement {
            connection: self.id,
            sql: sql.to_string(),
            shared: Arc::clone(&self.shared),
            alive: AtomicBool::new(!self.shared.behavior().prepare_dead),
            closed: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        });
        lock(&self.shared.statements).push(Arc::downgrade(&statement));
        Ok(statement)
    }

    async fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, SqlPoolError> {
        self.last_used = Instant::now();
        Ok(Box::new(MemoryTransaction {
            connection: self.id,
            shared: Arc::clone(&self.shared),
            isolation,
            active: !self.shared.behavior().begin_inactive,
            savepoints: Vec::new(),
            last_used: Instant::now(),
        }))
    }

    fn quote_string(&self, data: &str) -> String {
        quote_string(data)
    }

    fn quote_name(&self, name: &str) -> String {
        quote_name(name)
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn last_used_at(&self) -> Instant {
        self.last_used
    }
}

/// Statement prepared on one [`MemoryLink`].
pub struct MemoryStatement {
    connection: ConnectionId,
    sql: String,
    shared: Arc<Shared>,
    alive: AtomicBool,
    closed: AtomicBool,
    last_used: Mutex<Instant>,
}

impl MemoryStatement {
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MemoryStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStatement")
            .field("connection", &self.connection)
            .field("sql", &self.sql)
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Statement for MemoryStatement {
    async fn execute(&self, _params: &[RowValues]) -> Result<QueryResult, SqlPoolError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SqlPoolError::ConnectionError(format!(
                "prepared statement no longer exists: {}",
                self.sql
            )));
        }
        *lock(&self.last_used) = Instant::now();
        self.shared.counters.executions.fetch_add(1, Ordering::SeqCst);
        self.shared.answer(&self.sql)
    }

    fn query(&self) -> &str {
        &self.sql
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn last_used_at(&self) -> Instant {
        *lock(&self.last_used)
    }

    async fn close(&self) -> Result<(), SqlPoolError> {
        self.alive.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.shared
            .counters
            .statements_closed
            .fetch_add(1, Ordering::SeqCst);
        if self.shared.behavior().fail_close {
            return Err(SqlPoolError::Other(format!("could not deallocate {}", self.sql)));
        }
        Ok(())
    }
}

/// Cursor over generated rows.
pub struct MemoryCursor {
    columns: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
    remaining: VecDeque<Vec<RowValues>>,
    unbuffered: bool,
    fetched: usize,
    fail_after: Option<usize>,
}

impl MemoryCursor {
    #[must_use]
    pub fn new(rows: usize, unbuffered: bool, fail_after: Option<usize>) -> Self {
        let remaining = (1..=rows)
            .map(|i| {
                let id = i64::try_from(i).unwrap_or(i64::MAX);
                vec![RowValues::Int(id), RowValues::Text(format!("row {i}"))]
            })
            .collect();
        let columns = vec!["id".to_string(), "label".to_string()];
        Self {
            index: Arc::new(index_columns(&columns)),
            columns: Arc::new(columns),
            remaining,
            unbuffered,
            fetched: 0,
            fail_after,
        }
    }

    fn next_values(&mut self) -> Result<Option<Vec<RowValues>>, SqlPoolError> {
        if self.fail_after.is_some_and(|limit| self.fetched >= limit) {
            return Err(SqlPoolError::ConnectionError(
                "connection reset while streaming rows".into(),
            ));
        }
        let values = self.remaining.pop_front();
        if values.is_some() {
            self.fetched += 1;
        }
        Ok(values)
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    fn field_count(&self) -> usize {
        self.columns.len()
    }

    async fn fetch(&mut self, _style: FetchStyle) -> Result<Option<Row>, SqlPoolError> {
        Ok(self
            .next_values()?
            .map(|values| Row::with_index(Arc::clone(&self.columns), Arc::clone(&self.index), values)))
    }

    async fn fetch_column(&mut self, index: usize) -> Result<Option<RowValues>, SqlPoolError> {
        Ok(self
            .next_values()?
            .map(|mut values| {
                if index < values.len() {
                    values.swap_remove(index)
                } else {
                    RowValues::Null
                }
            }))
    }

    fn is_unbuffered(&self) -> bool {
        self.unbuffered
    }
}

/// Transaction on one [`MemoryLink`].
pub struct MemoryTransaction {
    connection: ConnectionId,
    shared: Arc<Shared>,
    isolation: IsolationLevel,
    active: bool,
    savepoints: Vec<String>,
    last_used: Instant,
}

impl MemoryTransaction {
    fn ensure_active(&mut self) -> Result<(), SqlPoolError> {
        if !self.active {
            return Err(SqlPoolError::TransactionStateError(format!(
                "no transaction in progress on {}",
                self.connection
            )));
        }
        self.last_used = Instant::now();
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&mut self, sql: &str) -> Result<QueryResult, SqlPoolError> {
        self.ensure_active()?;
        self.shared.answer(sql)
    }

    async fn execute(
        &mut self,
        sql: &str,
        _params: &[RowValues],
    ) -> Result<QueryResult, SqlPoolError> {
        self.ensure_active()?;
        self.shared.answer(sql)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Arc<dyn Statement>, SqlPoolError> {
        self.ensure_active()?;
        self.shared.counters.prepares.fetch_add(1, Ordering::SeqCst);
        let statement = Arc::new(MemoryStatement {
            connection: self.connection,
            sql: sql.to_string(),
            shared: Arc::clone(&self.shared),
            alive: AtomicBool::new(!self.shared.behavior().prepare_dead),
            closed: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        });
        lock(&self.shared.statements).push(Arc::downgrade(&statement));
        Ok(statement)
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn last_used_at(&self) -> Instant {
        self.last_used
    }

    async fn commit(&mut self) -> Result<CommandResult, SqlPoolError> {
        self.ensure_active()?;
        self.active = false;
        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        if self.shared.behavior().fail_commit {
            return Err(SqlPoolError::ConnectionError("connection lost during COMMIT".into()));
        }
        Ok(CommandResult::new(0))
    }

    async fn rollback(&mut self) -> Result<CommandResult, SqlPoolError> {
        self.ensure_active()?;
        self.active = false;
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.shared.behavior().fail_rollback {
            return Err(SqlPoolError::ConnectionError("connection lost during ROLLBACK".into()));
        }
        Ok(CommandResult::new(0))
    }

    async fn create_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.ensure_active()?;
        self.savepoints.push(identifier.to_string());
        Ok(CommandResult::new(0))
    }

    async fn rollback_to(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.ensure_active()?;
        let Some(position) = self.savepoints.iter().rposition(|name| name == identifier) else {
            return Err(SqlPoolError::query_error(
                format!("savepoint \"{identifier}\" does not exist"),
                format!("ROLLBACK TO SAVEPOINT {}", quote_name(identifier)),
            ));
        };
        self.savepoints.truncate(position + 1);
        Ok(CommandResult::new(0))
    }

    async fn release_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.ensure_active()?;
        let Some(position) = self.savepoints.iter().rposition(|name| name == identifier) else {
            return Err(SqlPoolError::query_error(
                format!("savepoint \"{identifier}\" does not exist"),
                format!("RELEASE SAVEPOINT {}", quote_name(identifier)),
            ));
        };
        self.savepoints.truncate(position);
        Ok(CommandResult::new(0))
    }

    fn quote_string(&self, data: &str) -> String {
        quote_string(data)
    }

    fn quote_name(&self, name: &str) -> String {
        quote_name(name)
    }
}

/// Connection factory for driving the `bb8` and `deadpool` adapters with memory links.
#[derive(Clone)]
pub struct MemoryManager {
    shared: Arc<Shared>,
}

impl MemoryManager {
    #[must_use]
    pub fn new(behavior: MemoryBehavior) -> Self {
        Self {
            shared: Arc::new(Shared {
                behavior: Mutex::new(behavior),
                counters: Counters::default(),
                statements: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn connections_created(&self) -> usize {
        self.shared.counters.connections_created.load(Ordering::SeqCst)
    }

    fn open(&self) -> MemoryLink {
        self.shared
            .counters
            .connections_created
            .fetch_add(1, Ordering::SeqCst);
        MemoryLink::new(Arc::clone(&self.shared))
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("connections_created", &self.connections_created())
            .finish()
    }
}

#[cfg(feature = "bb8")]
impl ::bb8::ManageConnection for MemoryManager {
    type Connection = MemoryLink;
    type Error = SqlPoolError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let conn = self.open();
        async move { Ok(conn) }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        _conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[cfg(feature = "deadpool")]
impl ::deadpool::managed::Manager for MemoryManager {
    type Type = MemoryLink;
    type Error = SqlPoolError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        Ok(self.open())
    }

    async fn recycle(
        &self,
        _conn: &mut Self::Type,
        _metrics: &::deadpool::managed::Metrics,
    ) -> ::deadpool::managed::RecycleResult<Self::Error> {
        Ok(())
    }
}

fn quote_string(data: &str) -> String {
    format!("'{}'", data.replace('\'', "''"))
}

fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_reuses_returned_connections_in_order() {
        let pool = MemoryPool::new(2);
        let a = pool.acquire().await.expect("first checkout");
        let b = pool.acquire().await.expect("second checkout");
        let (a_id, b_id) = (a.connection_id(), b.connection_id());
        pool.release(b);
        pool.release(a);

        assert_eq!(pool.idle_connections(), vec![b_id, a_id]);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.connections_created(), 2);
    }

    #[tokio::test]
    async fn select_yields_rows_and_commands_yield_counts() {
        let pool = MemoryPool::new(1);
        let mut conn = pool.acquire().await.expect("checkout");
        let QueryResult::Rows(mut cursor) = conn.query("SELECT * FROM t").await.expect("select")
        else {
            panic!("expected rows");
        };
        let first = cursor.fetch(FetchStyle::Assoc).await.expect("fetch").expect("row");
        assert_eq!(first.get("label").and_then(RowValues::as_text), Some("row 1"));

        let QueryResult::Command(result) = conn.query("DELETE FROM t").await.expect("delete") else {
            panic!("expected command");
        };
        assert_eq!(result.rows_affected, 1);
        assert!(conn.query("LOST").await.expect_err("lost").is_connection_error());
        pool.release(conn);
    }

    #[test]
    fn quoting_doubles_delimiters() {
        assert_eq!(quote_string("it's"), "'it''s'");
        assert_eq!(quote_name("odd\"name"), "\"odd\"\"name\"");
    }
}
