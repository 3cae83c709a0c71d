/// Result cache tests
///
/// Run with: cargo test --test cache_tests
use querykit::{Client, ConnectionConfig, DbError, MemoryStore, QueryCache, QueryResult, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

async fn client_with_users(cache: Arc<QueryCache>) -> (MemoryStore, Client) {
    let store = MemoryStore::new();
    let client = Client::new(store.clone(), ConnectionConfig::default()).cache(cache);
    client.execute("CREATE TABLE users (id INTEGER, name TEXT)", &[]).await.unwrap();
    client
        .execute_transaction(["INSERT INTO users VALUES (1, 'Alice')", "INSERT INTO users VALUES (2, 'Bob')"])
        .await
        .unwrap();
    (store, client)
}

#[tokio::test]
async fn test_executor_runs_once_and_result_is_shared() {
    let cache = QueryCache::new();
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    let executor = move |_: String| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(QueryResult::new(vec!["id".into()], vec![vec![Value::Integer(1)]]))
    };

    let first = cache.cached_execute("SELECT * FROM users", executor).await.unwrap();
    let second = cache.cached_execute("SELECT * FROM users", executor).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_client_cache_hit_skips_statement() {
    let cache = Arc::new(QueryCache::new());
    let (store, client) = client_with_users(Arc::clone(&cache)).await;

    let first = client.execute_cached("SELECT * FROM users").await.unwrap();
    let statements = store.stats().statements;
    let second = client.execute_cached("SELECT * FROM users").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.row_count(), 2);
    assert_eq!(store.stats().statements, statements);

    let stats = cache.stats().await;
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_cached_result_stays_stale_after_write() {
    let cache = Arc::new(QueryCache::new());
    let (_store, client) = client_with_users(Arc::clone(&cache)).await;

    let before = client.execute_cached("SELECT COUNT(*) FROM users").await.unwrap();
    client.execute("INSERT INTO users VALUES (3, 'Carol')", &[]).await.unwrap();
    let after = client.execute_cached("SELECT COUNT(*) FROM users").await.unwrap();

    assert_eq!(after.scalar(), Some(&Value::Integer(2)));
    assert!(Arc::ptr_eq(&before, &after));

    let fresh = client.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
    assert_eq!(fresh.scalar(), Some(&Value::Integer(3)));
}

#[tokio::test]
async fn test_cache_is_shared_between_clients() {
    let cache = Arc::new(QueryCache::new());
    let (store, client) = client_with_users(Arc::clone(&cache)).await;
    let other = Client::new(store.clone(), ConnectionConfig::default()).cache(Arc::clone(&cache));

    let first = client.execute_cached("SELECT name FROM users").await.unwrap();
    let second = other.execute_cached("SELECT name FROM users").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_failed_query_is_not_cached() {
    let cache = Arc::new(QueryCache::new());
    let (_store, client) = client_with_users(Arc::clone(&cache)).await;

    let err = client.execute_cached("SELECT * FROM orders").await.unwrap_err();
    assert_eq!(err, DbError::TableNotFound("orders".into()));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_execute_cached_requires_cache() {
    let client = Client::new(MemoryStore::new(), ConnectionConfig::default());
    let err = client.execute_cached("SELECT 1").await.unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}

#[tokio::test]
async fn test_cache_hit_still_uses_connection() {
    let cache = Arc::new(QueryCache::new());
    let (store, client) = client_with_users(Arc::clone(&cache)).await;

    client.execute_cached("SELECT * FROM users").await.unwrap();
    let opened = store.stats().connections_opened;
    client.execute_cached("SELECT * FROM users").await.unwrap();

    let stats = store.stats();
    assert_eq!(stats.connections_opened, opened + 1);
    assert_eq!(stats.active_connections, 0);
}
