use crate::core::{DbError, Result, Row, Value};
use crate::stream::{BatchStream, RowStream};
use futures::{Stream, TryStreamExt};

fn age_column(columns: &[String]) -> Result<usize> {
    columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("age"))
        .ok_or_else(|| DbError::ColumnNotFound("age".into(), super::USERS_TABLE.into()))
}

fn age_of(row: &Row, index: usize) -> Option<f64> {
    row.get(index).and_then(Value::as_f64)
}

/// Mean of the `age` column, computed one row at a time.
///
/// Returns `0.0` when the stream yields no rows. NULL ages are ignored.
pub async fn average_age(mut rows: RowStream) -> Result<f64> {
    let index = age_column(rows.columns())?;
    let (mut total, mut count) = (0.0, 0u64);

    while let Some(row) = rows.next().await? {
        if let Some(age) = age_of(&row, index) {
            total += age;
            count += 1;
        }
    }

    Ok(if count == 0 { 0.0 } else { total / count as f64 })
}

/// Keep only the users strictly older than `threshold`, batch by batch.
///
/// Batches keep their boundaries; a batch with no matching user comes out
/// empty.
pub fn users_over_age(batches: BatchStream, threshold: i64) -> Result<impl Stream<Item = Result<Vec<Row>>>> {
    let index = age_column(batches.columns())?;
    let threshold = threshold as f64;

    Ok(batches.into_stream().map_ok(move |batch| {
        batch
            .into_iter()
            .filter(|row| age_of(row, index).is_some_and(|age| age > threshold))
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, config::ConnectionConfig};
    use crate::storage::MemoryStore;

    async fn users(ages: &[i64]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut conn = ConnectionHandle::acquire(&store, &ConnectionConfig::default()).await.unwrap();
        conn.execute("CREATE TABLE user_data (name TEXT, age INTEGER)", &[]).await.unwrap();
        for (i, age) in ages.iter().enumerate() {
            conn.execute(
                "INSERT INTO user_data VALUES (?, ?)",
                &[Value::Text(format!("user{}", i)), Value::Integer(*age)],
            )
            .await
            .unwrap();
        }
        store
    }

    async fn connect(store: &MemoryStore) -> ConnectionHandle {
        ConnectionHandle::acquire(store, &ConnectionConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_average_age() {
        let store = users(&[20, 30, 40, 50]).await;
        let rows = RowStream::open(connect(&store).await, "SELECT age FROM user_data", &[]).await.unwrap();
        assert_eq!(average_age(rows).await.unwrap(), 35.0);
    }

    #[tokio::test]
    async fn test_average_age_empty_table() {
        let store = users(&[]).await;
        let rows = RowStream::open(connect(&store).await, "SELECT * FROM user_data", &[]).await.unwrap();
        assert_eq!(average_age(rows).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_average_age_requires_age_column() {
        let store = users(&[20]).await;
        let rows = RowStream::open(connect(&store).await, "SELECT name FROM user_data", &[]).await.unwrap();
        assert!(matches!(average_age(rows).await, Err(DbError::ColumnNotFound(..))));
        assert_eq!(store.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_users_over_age_keeps_batches() {
        let store = users(&[10, 30, 20, 40, 26]).await;
        let batches = BatchStream::open(connect(&store).await, "SELECT * FROM user_data", &[], 2)
            .await
            .unwrap();

        let filtered: Vec<Vec<Row>> = users_over_age(batches, 25).unwrap().try_collect().await.unwrap();
        let sizes: Vec<usize> = filtered.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
        assert_eq!(filtered[2][0][1], Value::Integer(26));
    }
}
