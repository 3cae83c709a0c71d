use crate::core::{DbError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store account
#[derive(Debug, Clone)]
pub struct User {
    username: String,
    password_hash: String,
}

impl User {
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Credentials checked when a session is opened.
pub struct AuthManager {
    users: RwLock<HashMap<String, User>>,
}

impl AuthManager {
    pub const DEFAULT_ADMIN_USERNAME: &'static str = "admin";
    pub const DEFAULT_ADMIN_PASSWORD: &'static str = "adminpass";

    /// Creates a manager holding the default administrator
    pub fn new() -> Self {
        Self::with_admin(Self::DEFAULT_ADMIN_USERNAME, Self::DEFAULT_ADMIN_PASSWORD)
    }

    pub fn with_admin(username: &str, password: &str) -> Self {
        let admin = User {
            username: username.to_string(),
            password_hash: hash_password(password),
        };

        Self {
            users: RwLock::new(HashMap::from([(username.to_string(), admin)])),
        }
    }

    /// Check a username/password pair.
    ///
    /// Unknown users and wrong passwords are reported the same way.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let users = self.users.read().await;

        let user = users
            .get(username)
            .filter(|user| bcrypt::verify(password, &user.password_hash).unwrap_or(false))
            .ok_or_else(|| DbError::Connection(format!("Access denied for user '{}'", username)))?;

        Ok(user.clone())
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(DbError::InvalidArgument("Password cannot be empty".into()));
        }

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(DbError::ExecutionError(format!("User '{}' already exists", username)));
        }

        let user = User {
            username: username.to_string(),
            password_hash: hash_password(password),
        };
        users.insert(username.to_string(), user);
        Ok(())
    }

    pub async fn user_exists(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    pub async fn list_users(&self) -> Vec<String> {
        let mut usernames: Vec<String> = self.users.read().await.keys().cloned().collect();
        usernames.sort();
        usernames
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap bcrypt cost; the store lives in process memory only.
const HASH_COST: u32 = 4;

fn hash_password(password: &str) -> String {
    bcrypt::hash(password, HASH_COST).expect("bcrypt cost constant is in range")
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(DbError::InvalidArgument("Username cannot be empty".into()));
    }

    if username.len() > 50 {
        return Err(DbError::InvalidArgument("Username too long (max 50 characters)".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_admin_authenticates() {
        let auth = AuthManager::new();
        let user = auth.authenticate("admin", "adminpass").await.unwrap();
        assert_eq!(user.username(), "admin");
    }

    #[tokio::test]
    async fn test_wrong_password_is_connection_error() {
        let auth = AuthManager::new();
        let err = auth.authenticate("admin", "nope").await.unwrap_err();
        assert!(err.is_connection());

        let err = auth.authenticate("ghost", "adminpass").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_create_user() {
        let auth = AuthManager::new();
        auth.create_user("reader", "secret").await.unwrap();

        assert!(auth.user_exists("reader").await);
        assert_eq!(auth.list_users().await, vec!["admin", "reader"]);
        assert!(auth.create_user("reader", "other").await.is_err());
        assert!(auth.authenticate("reader", "secret").await.is_ok());
    }
}
