use super::check_size;
use crate::connection::ConnectionHandle;
use crate::core::{Result, Row};
use futures::Stream;
use tracing::debug;

/// Offset pagination over a query.
///
/// Each page re-runs `<query> LIMIT page_size OFFSET offset` on the stream's
/// connection. The query must not carry its own LIMIT. Rows written between
/// pages can be skipped or seen twice.
pub struct PageStream {
    conn: Option<ConnectionHandle>,
    base: String,
    page_size: usize,
    offset: usize,
}

impl PageStream {
    pub fn open(conn: ConnectionHandle, sql: &str, page_size: usize) -> Result<Self> {
        check_size("page_size", page_size)?;
        let base = sql.trim().trim_end_matches(';').trim_end().to_string();
        Ok(Self {
            conn: Some(conn),
            base,
            page_size,
            offset: 0,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Offset the next page will be read from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn page_query(&self) -> String {
        format!("{} LIMIT {} OFFSET {}", self.base, self.page_size, self.offset)
    }

    /// Next non-empty page, or `Ok(None)` after the first empty one.
    pub async fn next(&mut self) -> Result<Option<Vec<Row>>> {
        let sql = self.page_query();
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };

        let page = match conn.query(&sql).await {
            Ok(result) => result.rows,
            Err(err) => {
                self.close_now();
                return Err(err);
            }
        };

        if page.is_empty() {
            debug!(offset = self.offset, "pagination finished");
            self.close_now();
            return Ok(None);
        }

        self.offset += self.page_size;
        Ok(Some(page))
    }

    pub async fn close(mut self) {
        self.close_now();
    }

    fn close_now(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.release();
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Row>>> {
        futures::stream::try_unfold(self, |mut pages| async move {
            Ok(pages.next().await?.map(|page| (page, pages)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::ConnectionConfig;
    use crate::core::Value;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_trailing_semicolon_is_trimmed() {
        let store = MemoryStore::new();
        let conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();

        let pages = PageStream::open(conn, "SELECT * FROM users ; ", 25).unwrap();
        assert_eq!(pages.page_query(), "SELECT * FROM users LIMIT 25 OFFSET 0");
    }

    #[tokio::test]
    async fn test_offset_advances_by_page_size() {
        let store = MemoryStore::new();
        let mut conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default())
            .await
            .unwrap();
        conn.query("CREATE TABLE p (v INTEGER)").await.unwrap();
        for v in 0..3i64 {
            conn.execute("INSERT INTO p VALUES (?)", &[Value::Integer(v)]).await.unwrap();
        }

        let mut pages = PageStream::open(conn, "SELECT v FROM p ORDER BY v", 2).unwrap();
        assert_eq!(pages.next().await.unwrap().unwrap().len(), 2);
        assert_eq!(pages.offset(), 2);
        assert_eq!(pages.next().await.unwrap().unwrap().len(), 1);
        assert!(pages.next().await.unwrap().is_none());
        assert_eq!(store.stats().active_connections, 0);
    }
}
