// ============================================================================
// Connection Guard
// ============================================================================
//
// A `ConnectionHandle` owns exactly one driver session. It is released once,
// either explicitly or when dropped, so every exit path of a caller
// (return, error, cancelled future, abandoned stream) gives the session back.
//
// ============================================================================

pub mod config;

use crate::core::{DbError, Result, Value};
use crate::result::QueryResult;
use async_trait::async_trait;
use config::ConnectionConfig;
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// Opens sessions against a store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one session.
    ///
    /// Implementations must report unreachable hosts, rejected credentials
    /// and missing databases as [`DbError::Connection`].
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// One open link to the store.
///
/// A session runs at most one transaction and at most one server-side
/// cursor at a time. `close` must be synchronous so that it can run from
/// `Drop`; it discards any open transaction and cursor.
#[async_trait]
pub trait Session: Send {
    fn id(&self) -> u64;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Run a query and keep its result set on the server side. Returns the
    /// column names.
    async fn open_cursor(&mut self, sql: &str, params: &[Value]) -> Result<Vec<String>>;

    /// Fetch up to `max_rows` rows from the open cursor. An empty vector means
    /// the cursor is exhausted.
    async fn fetch(&mut self, max_rows: usize) -> Result<Vec<crate::core::Row>>;

    async fn close_cursor(&mut self) -> Result<()>;

    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Open,
    InTransaction,
    Released,
}

/// Database connection handle
///
/// Exclusively owned by whoever acquired it. Every operation after
/// [`release`](Self::release) fails with [`DbError::HandleReleased`].
pub struct ConnectionHandle {
    id: u64,
    session: Option<Box<dyn Session>>,
    state: HandleState,
    /// Set when a transaction boundary was dropped while open; the rollback
    /// runs before the next operation (or is discarded by `close`).
    pending_rollback: bool,
}

impl ConnectionHandle {
    /// Acquire a session from `connector`, bounded by the configured connect
    /// timeout.
    pub async fn acquire(connector: &dyn Connector, config: &ConnectionConfig) -> Result<Self> {
        config.validate().map_err(DbError::Config)?;

        let session = tokio::time::timeout(config.connect_timeout, connector.connect(config))
            .await
            .map_err(|_| {
                DbError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout,
                    config.to_url()
                ))
            })??;

        let id = session.id();
        debug!(connection_id = id, database = %config.database, "connection acquired");

        Ok(Self::new(session))
    }

    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            id: session.id(),
            session: Some(session),
            state: HandleState::Open,
            pending_rollback: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state != HandleState::Released
    }

    /// True while a transaction boundary is active. A boundary that was
    /// dropped with its rollback still pending does not count.
    pub fn is_in_transaction(&self) -> bool {
        self.state == HandleState::InTransaction && !self.pending_rollback
    }

    /// Execute one statement with positional `?` parameters.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.session().await?.execute(sql, params).await
    }

    /// Execute a statement without parameters.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.execute(sql, &[]).await
    }

    pub(crate) async fn begin(&mut self) -> Result<()> {
        self.settle().await?;
        if self.state == HandleState::InTransaction {
            return Err(DbError::TransactionState("Transaction already active".into()));
        }

        self.session().await?.begin().await?;
        self.state = HandleState::InTransaction;
        Ok(())
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.settle().await?;
        self.ensure_in_transaction()?;
        // The boundary is over whatever the store answers.
        self.state = HandleState::Open;
        self.session().await?.commit().await
    }

    pub(crate) async fn rollback(&mut self) -> Result<()> {
        self.settle().await?;
        self.ensure_in_transaction()?;
        self.state = HandleState::Open;
        self.session().await?.rollback().await
    }

    pub(crate) fn schedule_rollback(&mut self) {
        if self.state == HandleState::InTransaction {
            self.pending_rollback = true;
        }
    }

    pub(crate) async fn open_cursor(&mut self, sql: &str, params: &[Value]) -> Result<Vec<String>> {
        self.session().await?.open_cursor(sql, params).await
    }

    pub(crate) async fn fetch(&mut self, max_rows: usize) -> Result<Vec<crate::core::Row>> {
        self.session().await?.fetch(max_rows).await
    }

    pub(crate) async fn close_cursor(&mut self) -> Result<()> {
        self.session().await?.close_cursor().await
    }

    /// Give the session back to the store.
    ///
    /// Returns `false` if the handle was already released; the session is
    /// closed at most once.
    pub fn release(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        if self.state == HandleState::InTransaction {
            warn!(connection_id = self.id, "releasing connection with an open transaction, discarding it");
        }

        session.close();
        self.state = HandleState::Released;
        self.pending_rollback = false;
        debug!(connection_id = self.id, "connection released");
        true
    }

    fn ensure_in_transaction(&self) -> Result<()> {
        match self.state {
            HandleState::InTransaction => Ok(()),
            HandleState::Released => Err(DbError::HandleReleased(self.id)),
            HandleState::Open => Err(DbError::TransactionState("No active transaction".into())),
        }
    }

    /// Run the rollback left behind by a dropped transaction boundary.
    async fn settle(&mut self) -> Result<()> {
        if !self.pending_rollback {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(DbError::HandleReleased(self.id))?;

        self.pending_rollback = false;
        self.state = HandleState::Open;
        debug!(connection_id = self.id, "rolling back abandoned transaction");
        session.rollback().await
    }

    /// Live session, settled.
    async fn session(&mut self) -> Result<&mut Box<dyn Session>> {
        self.settle().await?;
        self.session.as_mut().ok_or(DbError::HandleReleased(self.id))
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// Run `body` with a freshly acquired connection and release it afterwards.
///
/// If acquisition fails the error is returned, `body` never runs and there
/// is nothing to release. The handle is released whether `body` succeeds,
/// fails, or the returned future is dropped before completion.
pub async fn with_connection<T, F>(connector: &dyn Connector, config: &ConnectionConfig, body: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut ConnectionHandle) -> BoxFuture<'c, Result<T>>,
{
    let mut handle = ConnectionHandle::acquire(connector, config).await?;
    let result = body(&mut handle).await;
    handle.release();
    result
}
