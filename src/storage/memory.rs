// ============================================================================
// In-memory store
// ============================================================================
//
// A small relational store that lives in the process. Sessions opened
// through `Connector` run statements against named databases.
//
// Transactions:
//   - `begin` takes a snapshot of the database (persistent maps, no copy)
//   - the first write to a table takes its write lock and refreshes the
//     table from the committed state
//   - a write to a table locked by another session fails transiently
//   - commit publishes the touched tables, rollback discards them; both
//     release the locks
//
// Outside a transaction every write statement commits on its own.
//
// ============================================================================

use super::auth::AuthManager;
use super::engine::{self, Tables};
use super::faults::Faults;
use crate::connection::config::ConnectionConfig;
use crate::connection::{Connector, Session};
use crate::core::{DbError, Result, Row, Value};
use crate::parser::{SqlParserAdapter, Statement};
use crate::result::QueryResult;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DATABASE: &str = "querykit";

const TABLE_LOCKED: &str = "database table is locked";

#[derive(Default)]
struct Database {
    tables: Tables,
    /// Table name -> id of the session holding its write lock
    locks: HashMap<String, u64>,
}

impl Database {
    fn release_locks(&mut self, session_id: u64) {
        self.locks.retain(|_, owner| *owner != session_id);
    }
}

#[derive(Default)]
struct Counters {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    statements: AtomicU64,
    fetches: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lifecycle counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub commits: u64,
    /// Explicit rollbacks plus transactions discarded when a session closed.
    pub rollbacks: u64,
    /// Statements received through `execute` or a cursor.
    pub statements: u64,
    /// Cursor fetch round trips.
    pub fetches: u64,
}

struct Inner {
    host: String,
    databases: Mutex<HashMap<String, Database>>,
    auth: AuthManager,
    faults: Faults,
    counters: Counters,
    next_session_id: AtomicU64,
    parser: SqlParserAdapter,
}

impl Inner {
    fn databases(&self) -> MutexGuard<'_, HashMap<String, Database>> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an in-memory store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Store reachable at `localhost` with the `admin`/`adminpass` account
    /// and an empty `querykit` database.
    pub fn new() -> Self {
        Self::with_host(DEFAULT_HOST)
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        let databases = HashMap::from([(DEFAULT_DATABASE.to_string(), Database::default())]);
        Self {
            inner: Arc::new(Inner {
                host: host.into(),
                databases: Mutex::new(databases),
                auth: AuthManager::new(),
                faults: Faults::default(),
                counters: Counters::default(),
                next_session_id: AtomicU64::new(1),
                parser: SqlParserAdapter::new(),
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(DbError::InvalidArgument("Database name cannot be empty".into()));
        }

        let mut databases = self.inner.databases();
        if databases.contains_key(name) {
            return Err(DbError::ExecutionError(format!("Database '{}' already exists", name)));
        }
        databases.insert(name.to_string(), Database::default());
        Ok(())
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.inner.databases().contains_key(name)
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        self.inner.auth.create_user(username, password).await
    }

    /// Committed table names of `database`, sorted.
    pub fn table_names(&self, database: &str) -> Result<Vec<String>> {
        let databases = self.inner.databases();
        let db = databases
            .get(database)
            .ok_or_else(|| DbError::ExecutionError(format!("Unknown database '{}'", database)))?;

        let mut names: Vec<String> = db.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn faults(&self) -> &Faults {
        &self.inner.faults
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        let opened = c.connections_opened.load(Ordering::Relaxed);
        let closed = c.connections_closed.load(Ordering::Relaxed);
        StoreStats {
            connections_opened: opened,
            connections_closed: closed,
            active_connections: opened.saturating_sub(closed),
            commits: c.commits.load(Ordering::Relaxed),
            rollbacks: c.rollbacks.load(Ordering::Relaxed),
            statements: c.statements.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let inner = &self.inner;

        let delay = inner.faults.connect_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = inner.faults.next_connect() {
            return Err(err);
        }

        if !config.host.eq_ignore_ascii_case(&inner.host) {
            return Err(DbError::Connection(format!(
                "Can't connect to server on '{}:{}'",
                config.host, config.port
            )));
        }

        inner.auth.authenticate(&config.user, &config.password).await?;

        if !inner.databases().contains_key(&config.database) {
            return Err(DbError::Connection(format!("Unknown database '{}'", config.database)));
        }

        let id = inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        Counters::bump(&inner.counters.connections_opened);
        debug!(session_id = id, user = %config.user, database = %config.database, "session opened");

        Ok(Box::new(MemorySession {
            id,
            store: Arc::clone(inner),
            database: config.database.clone(),
            tx: None,
            cursor: None,
            closed: false,
        }))
    }
}

/// Work of an open transaction.
struct TxState {
    /// Snapshot taken at begin, with this transaction's writes applied
    tables: Tables,
    /// Tables this transaction has written and holds the lock of
    touched: HashSet<String>,
}

struct MemorySession {
    id: u64,
    store: Arc<Inner>,
    database: String,
    tx: Option<TxState>,
    cursor: Option<VecDeque<Row>>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DbError::Connection(format!("Session {} is closed", self.id)));
        }
        Ok(())
    }

    /// Take a scripted statement failure and parse `sql`.
    fn prepare(&self, sql: &str, params: &[Value]) -> Result<Statement> {
        self.ensure_open()?;
        Counters::bump(&self.store.counters.statements);

        if let Some(err) = self.store.faults.next_statement() {
            debug!(session_id = self.id, error = %err, "injected statement failure");
            return Err(err);
        }

        self.store.parser.parse(sql, params)
    }

    fn run(&mut self, stmt: Statement) -> Result<QueryResult> {
        let mut databases = self.store.databases();
        let db = databases
            .get_mut(&self.database)
            .ok_or_else(|| DbError::Connection(format!("Unknown database '{}'", self.database)))?;

        let Some(target) = stmt.target_table().map(str::to_string) else {
            // Reads see the transaction snapshot, or the latest commit.
            let tables = match &self.tx {
                Some(tx) => &tx.tables,
                None => &db.tables,
            };
            let Statement::Select(select) = &stmt else {
                return Err(DbError::UnsupportedOperation("Statement has no target table".into()));
            };
            return engine::query(tables, select);
        };

        if let Some(owner) = db.locks.get(&target)
            && *owner != self.id
        {
            trace!(session_id = self.id, table = %target, owner, "table write lock is held");
            return Err(DbError::Transient(TABLE_LOCKED.into()));
        }

        match self.tx.as_mut() {
            Some(tx) => {
                if tx.touched.insert(target.clone()) {
                    db.locks.insert(target.clone(), self.id);
                    match db.tables.get(&target) {
                        Some(table) => tx.tables.insert(target.clone(), table.clone()),
                        None => tx.tables.remove(&target),
                    };
                }
                engine::execute(&mut tx.tables, stmt)
            }
            None => {
                let mut tables = db.tables.clone();
                let result = engine::execute(&mut tables, stmt)?;
                db.tables = tables;
                Ok(result)
            }
        }
    }

    /// End the transaction: publish its tables or drop them, then unlock.
    fn finish_tx(&mut self, publish: bool) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionState("No active transaction".into()))?;

        let mut databases = self.store.databases();
        if let Some(db) = databases.get_mut(&self.database) {
            if publish {
                for name in &tx.touched {
                    match tx.tables.get(name) {
                        Some(table) => db.tables.insert(name.clone(), table.clone()),
                        None => db.tables.remove(name),
                    };
                }
            }
            db.release_locks(self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let stmt = self.prepare(sql, params)?;
        trace!(session_id = self.id, sql, "executing statement");
        self.run(stmt)
    }

    async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(DbError::TransactionState("Transaction already active".into()));
        }

        let databases = self.store.databases();
        let tables = databases
            .get(&self.database)
            .map(|db| db.tables.clone())
            .unwrap_or_default();
        drop(databases);

        self.tx = Some(TxState {
            tables,
            touched: HashSet::new(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.tx.is_none() {
            return Err(DbError::TransactionState("No active transaction".into()));
        }

        if let Some(err) = self.store.faults.next_commit() {
            // Nothing is published; the locks go with the transaction.
            self.finish_tx(false)?;
            return Err(err);
        }

        self.finish_tx(true)?;
        Counters::bump(&self.store.counters.commits);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finish_tx(false)?;

        if let Some(err) = self.store.faults.next_rollback() {
            return Err(err);
        }
        Counters::bump(&self.store.counters.rollbacks);
        Ok(())
    }

    async fn open_cursor(&mut self, sql: &str, params: &[Value]) -> Result<Vec<String>> {
        let stmt = self.prepare(sql, params)?;
        if !matches!(stmt, Statement::Select(_)) {
            return Err(DbError::UnsupportedOperation("Cursors require a SELECT statement".into()));
        }

        let result = self.run(stmt)?;
        self.cursor = Some(result.rows.into());
        Ok(result.columns)
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        self.ensure_open()?;
        Counters::bump(&self.store.counters.fetches);

        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::ExecutionError("No open cursor".into()))?;

        let take = max_rows.min(cursor.len());
        Ok(cursor.drain(..take).collect())
    }

    async fn close_cursor(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cursor = None;

        if self.tx.is_some() && self.finish_tx(false).is_ok() {
            Counters::bump(&self.store.counters.rollbacks);
        }

        Counters::bump(&self.store.counters.connections_closed);
        debug!(session_id = self.id, "session closed");
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}
