// ============================================================================
// Transaction Coordinator
// ============================================================================
//
// Wraps statements on one connection in a commit/rollback boundary.
// Exactly one of commit or rollback is attempted per boundary; failures of
// the body are returned unchanged after the rollback.
//
// ============================================================================

pub mod state;

pub use state::{TransactionOutcome, TransactionState};

use crate::connection::ConnectionHandle;
use crate::core::{DbError, Result, Value};
use crate::result::QueryResult;
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// An open commit/rollback boundary on a borrowed connection.
///
/// Dropping an open boundary schedules a rollback on the connection, which
/// runs before the connection is used again or is discarded on release.
pub struct Transaction<'c> {
    conn: &'c mut ConnectionHandle,
    state: TransactionState,
}

impl<'c> Transaction<'c> {
    pub async fn begin(conn: &'c mut ConnectionHandle) -> Result<Self> {
        conn.begin().await?;
        debug!(connection_id = conn.id(), "transaction started");
        Ok(Self {
            conn,
            state: TransactionState::Open,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The connection the boundary runs on.
    pub fn connection(&mut self) -> &mut ConnectionHandle {
        self.conn
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_open()?;
        self.conn.execute(sql, params).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.conn.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                debug!(connection_id = self.conn.id(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                // A failed commit leaves nothing published.
                self.state = TransactionState::RolledBack;
                warn!(connection_id = self.conn.id(), error = %err, "commit failed");
                Err(err)
            }
        }
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TransactionState::RolledBack;
        self.conn.rollback().await?;
        debug!(connection_id = self.conn.id(), "transaction rolled back");
        Ok(())
    }

    /// Close the boundary according to `outcome`: commit on `Ok`, roll back
    /// on `Err`. The body's error always wins over a rollback error.
    pub async fn finish<T>(mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, original = %err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(DbError::TransactionState(format!(
                "Transaction is already {}",
                self.state
            )))
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_open() {
            debug!(connection_id = self.conn.id(), "transaction dropped while open, scheduling rollback");
            self.conn.schedule_rollback();
        }
    }
}

/// Run `body` inside a transaction on `conn`.
///
/// Commits when `body` returns `Ok`. When `body` fails the transaction is
/// rolled back and the original error is returned; a rollback failure is
/// logged and never replaces it.
pub async fn with_transaction<T, F>(conn: &mut ConnectionHandle, body: F) -> Result<T>
where
    F: for<'t> FnOnce(&'t mut ConnectionHandle) -> BoxFuture<'t, Result<T>>,
{
    let mut tx = Transaction::begin(conn).await?;
    let outcome = body(tx.connection()).await;
    tx.finish(outcome).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::ConnectionConfig;
    use crate::storage::MemoryStore;

    async fn setup() -> (MemoryStore, ConnectionHandle) {
        let store = MemoryStore::new();
        let mut conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();
        conn.query("CREATE TABLE t (id INTEGER)").await.unwrap();
        (store, conn)
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let (_store, mut conn) = setup().await;
        let mut tx = Transaction::begin(&mut conn).await.unwrap();

        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);

        assert!(matches!(tx.rollback().await, Err(DbError::TransactionState(_))));
        assert!(matches!(tx.execute("SELECT * FROM t", &[]).await, Err(DbError::TransactionState(_))));
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_dropped_boundary_is_rolled_back() {
        let (store, mut conn) = setup().await;
        {
            let mut tx = Transaction::begin(&mut conn).await.unwrap();
            tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        }

        let result = conn.query("SELECT * FROM t").await.unwrap();
        assert_eq!(result.row_count(), 0);
        assert!(!conn.is_in_transaction());
        assert_eq!(store.stats().rollbacks, 1);
    }
}
