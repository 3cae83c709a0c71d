// ============================================================================
// Transaction Boundary State
// ============================================================================
//
// State transitions:
//
//   Open ──commit──> Committed
//     │
//     └──rollback──> RolledBack
//
// Terminal states are final; a boundary is never reopened.
//
// ============================================================================

use crate::core::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Statements may run inside the boundary
    Open,

    /// Changes were published to the store
    Committed,

    /// Changes were discarded
    RolledBack,
}

impl TransactionState {
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Open => write!(f, "OPEN"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED BACK"),
        }
    }
}

/// How a multi-statement transaction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Committed { rows_affected: u64 },
    /// The boundary was rolled back because of this failure.
    RolledBack(DbError),
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn error(&self) -> Option<&DbError> {
        match self {
            Self::RolledBack(err) => Some(err),
            Self::Committed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(TransactionState::Open.is_open());
        assert!(!TransactionState::Open.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::RolledBack.is_terminal());
        assert_eq!(TransactionState::RolledBack.to_string(), "ROLLED BACK");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = TransactionOutcome::Committed { rows_affected: 2 };
        assert!(ok.is_committed());
        assert!(ok.error().is_none());

        let failed = TransactionOutcome::RolledBack(DbError::Transient("locked".into()));
        assert!(!failed.is_committed());
        assert!(failed.error().unwrap().is_transient());
    }
}
