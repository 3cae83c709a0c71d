/// Users toolkit tests
///
/// CSV seeding and the streaming reports over `user_data`.
/// Run with: cargo test --test users_tests
use futures::TryStreamExt;
use querykit::users::{self, SeedReport, UserRecord, UserSeeder};
use querykit::{Client, ConnectionConfig, MemoryStore, Row, Value};

const USERS_CSV: &str = "name,email,age
Alice Johnson,alice@example.com,34
Bob Smith,bob@example.com,19
Carol White,carol@example.com,41
Invalid Age,bad@example.com,200
,missing-name@example.com,30
Alice Again,alice@example.com,35
Dan Brown,dan@example.com,26
";

fn client() -> (MemoryStore, Client) {
    let store = MemoryStore::new();
    (store.clone(), Client::new(store, ConnectionConfig::default()))
}

#[tokio::test]
async fn test_seed_from_csv_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("user_data.csv");
    std::fs::write(&path, USERS_CSV).unwrap();

    let records = users::read_users_csv(&path).unwrap();
    assert_eq!(records.len(), 5);

    let (store, client) = client();
    let seeder = UserSeeder::new(&client);
    let report = seeder.seed(&records).await.unwrap();

    // The second alice@example.com row is a duplicate.
    assert_eq!(report, SeedReport { inserted: 4, skipped: 1 });
    assert_eq!(seeder.count().await.unwrap(), 4);
    assert_eq!(store.table_names("querykit").unwrap(), vec![users::USERS_TABLE.to_string()]);
}

#[tokio::test]
async fn test_reseeding_skips_existing_emails() {
    let (_store, client) = client();
    let seeder = UserSeeder::new(&client);
    let records = users::parse_users_csv(USERS_CSV).unwrap();

    seeder.seed(&records).await.unwrap();
    let again = seeder.seed(&users::parse_users_csv(USERS_CSV).unwrap()).await.unwrap();

    assert_eq!(again, SeedReport { inserted: 0, skipped: 5 });
    assert_eq!(seeder.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_seed_runs_in_one_transaction() {
    let (store, client) = client();
    let seeder = UserSeeder::new(&client);
    seeder.create_table().await.unwrap();
    let commits = store.stats().commits;

    let records: Vec<UserRecord> = (0..20)
        .map(|i| UserRecord::new(format!("User {}", i), format!("user{}@example.com", i), 20 + i))
        .collect();
    seeder.seed(&records).await.unwrap();

    // One for the idempotent CREATE TABLE, one for the load.
    assert_eq!(store.stats().commits, commits + 2);
}

#[tokio::test]
async fn test_average_age_over_seeded_users() {
    let (_store, client) = client();
    UserSeeder::new(&client)
        .seed(&users::parse_users_csv(USERS_CSV).unwrap())
        .await
        .unwrap();

    let rows = client.stream_rows("SELECT age FROM user_data", &[]).await.unwrap();
    let average = users::average_age(rows).await.unwrap();
    assert_eq!(average, (34.0 + 19.0 + 41.0 + 26.0) / 4.0);
}

#[tokio::test]
async fn test_users_over_age() {
    let (store, client) = client();
    UserSeeder::new(&client)
        .seed(&users::parse_users_csv(USERS_CSV).unwrap())
        .await
        .unwrap();

    let batches = client
        .stream_batches("SELECT name, age FROM user_data ORDER BY age", &[], 2)
        .await
        .unwrap();
    let over: Vec<Vec<Row>> = users::users_over_age(batches, 25).unwrap().try_collect().await.unwrap();

    let names: Vec<Value> = over.into_iter().flatten().map(|row| row[0].clone()).collect();
    assert_eq!(
        names,
        vec![
            Value::Text("Dan Brown".into()),
            Value::Text("Alice Johnson".into()),
            Value::Text("Carol White".into()),
        ]
    );
    assert_eq!(store.stats().active_connections, 0);
}
