use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection handle {0} has been released")]
    HandleReleased(u64),

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Coarse failure class used by the retry policy and by callers that only
/// care whether an operation may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The store could not be reached or refused the session.
    Connection,
    /// Retrying the same operation unchanged may succeed (lock contention, blips).
    Transient,
    /// Retrying cannot help (malformed statement, constraint violation, misuse).
    Permanent,
}

lazy_static! {
    static ref TRANSIENT_MESSAGE: Regex = Regex::new(
        r"(?i)(database( table)? is locked|deadlock|lock wait timeout|try restarting transaction|connection reset|temporarily unavailable)"
    )
    .expect("transient message pattern is valid");
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Transient(_) => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }

    /// Classify a raw driver error message.
    ///
    /// Lock contention and dropped-connection messages become
    /// [`DbError::Transient`]; everything else is treated as a permanent
    /// execution failure.
    pub fn from_driver_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if TRANSIENT_MESSAGE.is_match(&message) {
            Self::Transient(message)
        } else {
            Self::ExecutionError(message)
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(DbError::Connection("refused".into()).kind(), ErrorKind::Connection);
        assert_eq!(DbError::Transient("locked".into()).kind(), ErrorKind::Transient);
        assert_eq!(DbError::ParseError("bad".into()).kind(), ErrorKind::Permanent);
        assert_eq!(DbError::HandleReleased(3).kind(), ErrorKind::Permanent);
        assert!(DbError::ConstraintViolation("dup".into()).is_permanent());
    }

    #[test]
    fn test_driver_message_classification() {
        assert!(DbError::from_driver_message("database is locked").is_transient());
        assert!(DbError::from_driver_message("Deadlock found when trying to get lock; try restarting transaction").is_transient());
        assert!(DbError::from_driver_message("Lock wait timeout exceeded").is_transient());
        assert!(DbError::from_driver_message("UNIQUE constraint failed: users.email").is_permanent());
        assert!(DbError::from_driver_message("near \"SELEC\": syntax error").is_permanent());
    }
}
