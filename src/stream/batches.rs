use super::{Cursor, check_size};
use crate::connection::ConnectionHandle;
use crate::core::{Result, Row, Value};
use futures::Stream;

/// Rows of one query in chunks of at most `batch_size`.
///
/// Every batch except possibly the last one is full. The sequence ends at
/// the first empty fetch, which is not yielded.
#[derive(Debug)]
pub struct BatchStream {
    cursor: Cursor,
    batch_size: usize,
}

impl BatchStream {
    pub async fn open(conn: ConnectionHandle, sql: &str, params: &[Value], batch_size: usize) -> Result<Self> {
        check_size("batch_size", batch_size)?;
        Ok(Self {
            cursor: Cursor::open(conn, sql, params).await?,
            batch_size,
        })
    }

    pub fn columns(&self) -> &[String] {
        self.cursor.columns()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn next(&mut self) -> Result<Option<Vec<Row>>> {
        let batch = self.cursor.fetch(self.batch_size).await?;
        Ok((!batch.is_empty()).then_some(batch))
    }

    pub async fn close(mut self) {
        self.cursor.finish().await;
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Row>>> {
        futures::stream::try_unfold(self, |mut batches| async move {
            Ok(batches.next().await?.map(|batch| (batch, batches)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::ConnectionConfig;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_empty_result_yields_nothing() {
        let store = MemoryStore::new();
        let mut conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();
        conn.query("CREATE TABLE e (v INTEGER)").await.unwrap();

        let mut batches = BatchStream::open(conn, "SELECT * FROM e", &[], 5).await.unwrap();
        assert!(batches.next().await.unwrap().is_none());
        assert_eq!(store.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_size_must_be_positive() {
        let store = MemoryStore::new();
        let conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();

        let err = BatchStream::open(conn, "SELECT 1", &[], 0).await.err().unwrap();
        assert!(matches!(err, crate::core::DbError::InvalidArgument(_)));
    }
}
