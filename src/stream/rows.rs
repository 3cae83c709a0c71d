use super::{Cursor, DEFAULT_PREFETCH, check_size};
use crate::connection::ConnectionHandle;
use crate::core::{Result, Row, Value};
use futures::Stream;
use std::collections::VecDeque;

/// Rows of one query, produced one at a time.
///
/// At most `prefetch` rows are held on the client side at any moment.
#[derive(Debug)]
pub struct RowStream {
    cursor: Cursor,
    prefetch: usize,
    buffered: VecDeque<Row>,
    yielded: u64,
}

impl RowStream {
    pub async fn open(conn: ConnectionHandle, sql: &str, params: &[Value]) -> Result<Self> {
        Self::with_prefetch(conn, sql, params, DEFAULT_PREFETCH).await
    }

    pub async fn with_prefetch(conn: ConnectionHandle, sql: &str, params: &[Value], prefetch: usize) -> Result<Self> {
        check_size("prefetch", prefetch)?;
        Ok(Self {
            cursor: Cursor::open(conn, sql, params).await?,
            prefetch,
            buffered: VecDeque::with_capacity(prefetch),
            yielded: 0,
        })
    }

    pub fn columns(&self) -> &[String] {
        self.cursor.columns()
    }

    /// Rows handed out so far.
    pub fn rows_read(&self) -> u64 {
        self.yielded
    }

    pub fn round_trips(&self) -> u64 {
        self.cursor.fetches()
    }

    /// `Ok(None)` once the result is exhausted; the connection is released
    /// at that point.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.buffered.is_empty() && !self.cursor.is_exhausted() {
            self.buffered.extend(self.cursor.fetch(self.prefetch).await?);
        }

        let row = self.buffered.pop_front();
        if row.is_some() {
            self.yielded += 1;
        }
        Ok(row)
    }

    /// Stop early and release the connection.
    pub async fn close(mut self) {
        self.buffered.clear();
        self.cursor.finish().await;
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> {
        futures::stream::try_unfold(self, |mut rows| async move {
            Ok(rows.next().await?.map(|row| (row, rows)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::ConnectionConfig;
    use crate::storage::MemoryStore;
    use futures::TryStreamExt;

    async fn seeded(rows: i64) -> (MemoryStore, ConnectionHandle) {
        let store = MemoryStore::new();
        let mut conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();
        conn.query("CREATE TABLE n (v INTEGER)").await.unwrap();
        for v in 0..rows {
            conn.execute("INSERT INTO n VALUES (?)", &[Value::Integer(v)]).await.unwrap();
        }
        (store, conn)
    }

    #[tokio::test]
    async fn test_rows_in_order_then_release() {
        let (store, conn) = seeded(3).await;
        let mut rows = RowStream::open(conn, "SELECT v FROM n ORDER BY v", &[]).await.unwrap();
        assert_eq!(rows.columns(), ["v"]);

        let mut seen = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            seen.push(row[0].clone());
        }

        assert_eq!(seen, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
        assert_eq!(store.stats().active_connections, 0);
        assert!(rows.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefetch_bounds_round_trips() {
        let (_store, conn) = seeded(10).await;
        let rows = RowStream::with_prefetch(conn, "SELECT v FROM n", &[], 4).await.unwrap();

        let mut stream = Box::pin(rows.into_stream());
        let mut count = 0;
        while stream.try_next().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_zero_prefetch_rejected() {
        let (store, conn) = seeded(1).await;
        let err = RowStream::with_prefetch(conn, "SELECT v FROM n", &[], 0).await.err().unwrap();
        assert!(matches!(err, crate::core::DbError::InvalidArgument(_)));
        assert_eq!(store.stats().active_connections, 0);
    }
}
