use crate::Client;
use crate::core::{DbError, ErrorKind, Result, Value};
use crate::transaction::Transaction;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const USERS_TABLE: &str = "user_data";

pub const MAX_AGE: i64 = 150;

const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS user_data (
    user_id CHAR(36) PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    email VARCHAR(255) NOT NULL,
    age INTEGER NOT NULL
)";

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub age: i64,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: i64) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            age,
        }
    }

    fn params(&self) -> Vec<Value> {
        vec![
            Value::Text(self.user_id.to_string()),
            Value::Text(self.name.clone()),
            Value::Text(self.email.clone()),
            Value::Integer(self.age),
        ]
    }
}

/// Read users from a `name,email,age` CSV file.
pub fn read_users_csv(path: impl AsRef<Path>) -> Result<Vec<UserRecord>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_users_csv(&text)
}

/// Parse `name,email,age` CSV text. Header columns may appear in any order.
///
/// Rows with an empty name or email, a non-numeric age, or an age outside
/// `0..=150` are skipped with a warning. Each accepted row gets a fresh
/// random user id.
pub fn parse_users_csv(text: &str) -> Result<Vec<UserRecord>> {
    let mut records = split_records(text).into_iter();

    let (_, header) = records
        .next()
        .ok_or_else(|| DbError::InvalidArgument("CSV input is empty".into()))?;

    let position = |name: &str| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| DbError::InvalidArgument(format!("CSV header is missing '{}'", name)))
    };
    let (name_at, email_at, age_at) = (position("name")?, position("email")?, position("age")?);

    let mut users = Vec::new();
    for (line, fields) in records {
        let field = |i: usize| fields.get(i).map(|f| f.trim()).unwrap_or_default();

        let (name, email) = (field(name_at), field(email_at));
        let age = match field(age_at).parse::<i64>() {
            Ok(age) => age,
            Err(_) => {
                warn!(line, "invalid age, skipping row");
                continue;
            }
        };

        if name.is_empty() || email.is_empty() || !(0..=MAX_AGE).contains(&age) {
            warn!(line, email, "invalid user data, skipping row");
            continue;
        }

        users.push(UserRecord::new(name, email, age));
    }

    debug!(count = users.len(), "read users from CSV");
    Ok(users)
}

// Comma separated, with optional double quotes and "" as an escaped quote.
// Quoted fields may span line breaks. Each record carries the line it starts
// on; blank lines are dropped.
fn split_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut line = 1;
    let mut start = 1;
    let mut chars = text.chars().peekable();

    let mut finish = |fields: &mut Vec<String>, current: &mut String, start: usize| {
        fields.push(std::mem::take(current));
        let record = std::mem::take(fields);
        if !(record.len() == 1 && record[0].trim().is_empty()) {
            records.push((start, record));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            '\r' if !quoted && chars.peek() == Some(&'\n') => {}
            '\n' if !quoted => {
                finish(&mut fields, &mut current, start);
                line += 1;
                start = line;
            }
            '\n' => {
                current.push(c);
                line += 1;
            }
            _ => current.push(c),
        }
    }
    finish(&mut fields, &mut current, start);
    records
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Loads user records into the `user_data` table.
pub struct UserSeeder<'a> {
    client: &'a Client,
}

impl<'a> UserSeeder<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn create_table(&self) -> Result<()> {
        self.client.execute(CREATE_USERS_TABLE, &[]).await?;
        Ok(())
    }

    /// Insert `users` in a single transaction.
    ///
    /// Users whose email is already present (in the table or earlier in
    /// `users`) are skipped, as are rows the store rejects. Connection and
    /// transient failures abort the whole load.
    pub async fn seed(&self, users: &[UserRecord]) -> Result<SeedReport> {
        self.create_table().await?;

        let mut conn = self.client.connect().await?;
        let mut tx = Transaction::begin(&mut conn).await?;
        let outcome = Self::insert_all(&mut tx, users).await;
        let report = tx.finish(outcome).await?;

        info!(inserted = report.inserted, skipped = report.skipped, "user seeding finished");
        Ok(report)
    }

    pub async fn count(&self) -> Result<i64> {
        let result = self.client.query("SELECT COUNT(*) FROM user_data", &[]).await?;
        Ok(result.scalar().and_then(Value::as_i64).unwrap_or_default())
    }

    async fn insert_all(tx: &mut Transaction<'_>, users: &[UserRecord]) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for user in users {
            let existing = tx
                .execute(
                    "SELECT COUNT(*) FROM user_data WHERE email = ?",
                    &[Value::Text(user.email.clone())],
                )
                .await?;
            if existing.scalar().and_then(Value::as_i64).unwrap_or_default() > 0 {
                debug!(email = %user.email, "skipping duplicate email");
                report.skipped += 1;
                continue;
            }

            match tx
                .execute("INSERT INTO user_data (user_id, name, email, age) VALUES (?, ?, ?, ?)", &user.params())
                .await
            {
                Ok(_) => report.inserted += 1,
                Err(err) if err.kind() == ErrorKind::Permanent => {
                    warn!(email = %user.email, error = %err, "failed to insert user");
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }
}
