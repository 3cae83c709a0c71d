// ============================================================================
// querykit Library
// ============================================================================

pub mod cache;
pub mod connection;
pub mod core;
pub mod parser;
pub mod result;
pub mod retry;
pub mod settings;
pub mod storage;
pub mod stream;
pub mod transaction;
pub mod users;

// Re-export main types for convenience
pub use cache::QueryCache;
pub use connection::{ConnectionHandle, Connector, Session, config::ConnectionConfig, with_connection};
pub use crate::core::{DataType, DbError, ErrorKind, Result, Row, Value};
pub use result::QueryResult;
pub use retry::{RetryPolicy, with_retry};
pub use settings::{Settings, StreamSettings};
pub use storage::{MemoryStore, StoreStats};
pub use stream::{BatchStream, PageStream, RowStream};
pub use transaction::{Transaction, TransactionOutcome, TransactionState, with_transaction};

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// High-level Client API
// ============================================================================

/// One statement of a multi-statement transaction, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Operation {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl From<&str> for Operation {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for Operation {
    fn from((sql, params): (S, Vec<Value>)) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Database client
///
/// Composes the resource guards in one fixed order for every operation:
///
/// ```text
/// connection guard -> transaction -> retry -> cache -> statement
/// ```
///
/// Each call acquires its own connection and releases it before returning,
/// so concurrent calls never share a handle.
///
/// # Examples
///
/// ```
/// use querykit::{Client, ConnectionConfig, MemoryStore, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> querykit::Result<()> {
/// let store = MemoryStore::new();
/// let client = Client::new(store, ConnectionConfig::default());
///
/// client.execute("CREATE TABLE users (id INTEGER, name TEXT, age INTEGER)", &[]).await?;
/// client
///     .execute("INSERT INTO users VALUES (?, ?, ?)", &[Value::Integer(1), "Alice".into(), Value::Integer(30)])
///     .await?;
///
/// let result = client.query("SELECT * FROM users WHERE age > ?", &[Value::Integer(25)]).await?;
/// assert_eq!(result.row_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    retry: RetryPolicy,
    cache: Option<Arc<QueryCache>>,
    stream: StreamSettings,
}

impl Client {
    pub fn new<C>(connector: C, config: ConnectionConfig) -> Self
    where
        C: Connector + 'static,
    {
        Self {
            connector: Arc::new(connector),
            config,
            retry: RetryPolicy::default(),
            cache: None,
            stream: StreamSettings::default(),
        }
    }

    /// Client configured from a settings file.
    pub fn from_settings<C>(connector: C, settings: &Settings) -> Self
    where
        C: Connector + 'static,
    {
        Self::new(connector, settings.connection.clone())
            .retry(settings.retry.clone())
            .stream_settings(settings.stream.clone())
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Serve [`execute_cached`](Self::execute_cached) from `cache`.
    pub fn cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Acquire a connection for caller-managed work.
    ///
    /// Acquisition failures are retried only when the retry policy accepts
    /// them (transient failures, and connection failures when enabled).
    pub async fn connect(&self) -> Result<ConnectionHandle> {
        let mut attempts = self.retry.attempts();
        loop {
            match ConnectionHandle::acquire(self.connector.as_ref(), &self.config).await {
                Ok(conn) => return Ok(conn),
                Err(err) => attempts.on_failure(err).await?,
            }
        }
    }

    /// Run `body` with a connection that is released afterwards, on every
    /// exit path.
    pub async fn with_connection<T, F>(&self, body: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut ConnectionHandle) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.connect().await?;
        let result = body(&mut conn).await;
        conn.release();
        result
    }

    /// Execute one statement in its own transaction, retrying transient
    /// failures.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = self.connect().await?;
        let mut tx = Transaction::begin(&mut conn).await?;
        let outcome = self.run_with_retry(tx.connection(), sql, params).await;
        tx.finish(outcome).await
    }

    /// Run a read-only statement without a transaction boundary.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut conn = self.connect().await?;
        self.run_with_retry(&mut conn, sql, params).await
    }

    /// Execute `sql` through the configured result cache.
    ///
    /// A cache hit still goes through connection acquisition and the
    /// transaction boundary; only the statement itself is skipped. The key is
    /// the query text alone, so only parameterless, read-only queries belong
    /// here.
    pub async fn execute_cached(&self, sql: &str) -> Result<Arc<QueryResult>> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| DbError::Config("no result cache configured for this client".into()))?;

        let mut conn = self.connect().await?;
        let mut tx = Transaction::begin(&mut conn).await?;

        let mut attempts = self.retry.attempts();
        let outcome = loop {
            let conn = tx.connection();
            let attempt = cache
                .cached_execute(sql, |query| async move {
                    debug!(sql = %query, params = 0, "executing statement");
                    conn.execute(&query, &[]).await
                })
                .await;

            match attempt {
                Ok(result) => break Ok(result),
                Err(err) => {
                    if let Err(err) = attempts.on_failure(err).await {
                        break Err(err);
                    }
                }
            }
        };

        tx.finish(outcome).await
    }

    /// Stream the rows of `sql` one at a time.
    pub async fn stream_rows(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        stream::check_size("prefetch", self.stream.prefetch)?;
        let conn = self.connect().await?;
        debug!(sql, params = params.len(), "opening row stream");
        RowStream::with_prefetch(conn, sql, params, self.stream.prefetch).await
    }

    /// Stream the rows of `sql` in batches of at most `batch_size`.
    pub async fn stream_batches(&self, sql: &str, params: &[Value], batch_size: usize) -> Result<BatchStream> {
        stream::check_size("batch_size", batch_size)?;
        let conn = self.connect().await?;
        debug!(sql, params = params.len(), batch_size, "opening batch stream");
        BatchStream::open(conn, sql, params, batch_size).await
    }

    /// Page through `sql` with LIMIT/OFFSET.
    pub async fn stream_pages(&self, sql: &str, page_size: usize) -> Result<PageStream> {
        stream::check_size("page_size", page_size)?;
        let conn = self.connect().await?;
        debug!(sql, page_size, "opening page stream");
        PageStream::open(conn, sql, page_size)
    }

    /// Run `statements` in one transaction.
    ///
    /// Statement failures are retried by the retry policy; a failure that
    /// survives it rolls the whole transaction back and is reported as
    /// [`TransactionOutcome::RolledBack`]. `Err` is only returned when no
    /// connection could be acquired.
    pub async fn execute_transaction<I, S>(&self, statements: I) -> Result<TransactionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<Operation>,
    {
        let operations: Vec<Operation> = statements.into_iter().map(Into::into).collect();
        let mut conn = self.connect().await?;

        let mut tx = match Transaction::begin(&mut conn).await {
            Ok(tx) => tx,
            Err(err) => return Ok(TransactionOutcome::RolledBack(err)),
        };

        let mut rows_affected = 0;
        for op in &operations {
            match self.run_with_retry(tx.connection(), &op.sql, &op.params).await {
                Ok(result) => rows_affected += result.rows_affected,
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, original = %err, "rollback failed");
                    }
                    return Ok(TransactionOutcome::RolledBack(err));
                }
            }
        }

        match tx.commit().await {
            Ok(()) => Ok(TransactionOutcome::Committed { rows_affected }),
            Err(err) => Ok(TransactionOutcome::RolledBack(err)),
        }
    }

    async fn run_with_retry(&self, conn: &mut ConnectionHandle, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut attempts = self.retry.attempts();
        loop {
            debug!(
                connection_id = conn.id(),
                sql,
                params = params.len(),
                attempt = attempts.attempt(),
                "executing statement"
            );
            match conn.execute(sql, params).await {
                Ok(result) => return Ok(result),
                Err(err) => attempts.on_failure(err).await?,
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
