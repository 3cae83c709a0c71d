// ============================================================================
// Bounded Stream Reader
// ============================================================================
//
// Three ways of consuming a large result without holding all of it:
//
//   RowStream    one row at a time through a server-side cursor
//   BatchStream  up to `batch_size` rows per cursor fetch
//   PageStream   `<query> LIMIT n OFFSET m`, one statement per page
//
// Each stream owns the connection it reads from. Exhaustion, `close()` and
// drop all give the connection back.
//
// ============================================================================

pub mod batches;
pub mod pages;
pub mod rows;

pub use batches::BatchStream;
pub use pages::PageStream;
pub use rows::RowStream;

use crate::connection::ConnectionHandle;
use crate::core::{DbError, Result, Row, Value};
use tracing::{debug, warn};

pub const DEFAULT_PREFETCH: usize = 1;

pub(crate) fn check_size(name: &str, size: usize) -> Result<()> {
    if size == 0 {
        return Err(DbError::InvalidArgument(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

/// Server-side cursor shared by the row and batch readers.
#[derive(Debug)]
pub(crate) struct Cursor {
    conn: Option<ConnectionHandle>,
    columns: Vec<String>,
    fetches: u64,
}

impl Cursor {
    pub(crate) async fn open(mut conn: ConnectionHandle, sql: &str, params: &[Value]) -> Result<Self> {
        // On failure `conn` is dropped here and released.
        let columns = conn.open_cursor(sql, params).await?;
        debug!(connection_id = conn.id(), sql, "cursor opened");
        Ok(Self {
            conn: Some(conn),
            columns,
            fetches: 0,
        })
    }

    pub(crate) fn columns(&self) -> &[String] {
        &self.columns
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.conn.is_none()
    }

    /// Number of fetch round trips made so far.
    pub(crate) fn fetches(&self) -> u64 {
        self.fetches
    }

    /// Next chunk of at most `max_rows` rows.
    ///
    /// An empty chunk means the result is exhausted; the connection has
    /// been released by then. A failed fetch also releases it.
    pub(crate) async fn fetch(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(Vec::new());
        };

        self.fetches += 1;
        match conn.fetch(max_rows).await {
            Ok(rows) if rows.is_empty() => {
                self.finish().await;
                Ok(rows)
            }
            Ok(rows) => Ok(rows),
            Err(err) => {
                warn!(error = %err, "cursor fetch failed, releasing connection");
                self.conn.take();
                Err(err)
            }
        }
    }

    /// Close the cursor and release the connection.
    pub(crate) async fn finish(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if let Err(err) = conn.close_cursor().await {
            debug!(connection_id = conn.id(), error = %err, "closing cursor failed");
        }
        conn.release();
    }
}
