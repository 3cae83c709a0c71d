use crate::core::DbError;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scripted failures for the in-memory store.
///
/// Each queue is consumed front to back: `fail_statements(2, err)` makes the
/// next two statements fail with `err`, after which statements run normally.
#[derive(Debug, Default)]
pub struct Faults {
    plan: Mutex<FaultPlan>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    connects: VecDeque<DbError>,
    statements: VecDeque<DbError>,
    commits: VecDeque<DbError>,
    rollbacks: VecDeque<DbError>,
    connect_delay: Duration,
}

impl Faults {
    fn plan(&self) -> MutexGuard<'_, FaultPlan> {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_connects(&self, times: usize, err: DbError) -> &Self {
        self.plan().connects.extend(std::iter::repeat_n(err, times));
        self
    }

    /// Applies to `execute` and to opening a cursor.
    pub fn fail_statements(&self, times: usize, err: DbError) -> &Self {
        self.plan().statements.extend(std::iter::repeat_n(err, times));
        self
    }

    pub fn fail_commits(&self, times: usize, err: DbError) -> &Self {
        self.plan().commits.extend(std::iter::repeat_n(err, times));
        self
    }

    pub fn fail_rollbacks(&self, times: usize, err: DbError) -> &Self {
        self.plan().rollbacks.extend(std::iter::repeat_n(err, times));
        self
    }

    /// Make every connection attempt wait before answering.
    pub fn delay_connects(&self, delay: Duration) -> &Self {
        self.plan().connect_delay = delay;
        self
    }

    /// Forget every scripted failure and delay.
    pub fn clear(&self) {
        *self.plan() = FaultPlan::default();
    }

    pub(crate) fn next_connect(&self) -> Option<DbError> {
        self.plan().connects.pop_front()
    }

    pub(crate) fn next_statement(&self) -> Option<DbError> {
        self.plan().statements.pop_front()
    }

    pub(crate) fn next_commit(&self) -> Option<DbError> {
        self.plan().commits.pop_front()
    }

    pub(crate) fn next_rollback(&self) -> Option<DbError> {
        self.plan().rollbacks.pop_front()
    }

    pub(crate) fn connect_delay(&self) -> Duration {
        self.plan().connect_delay
    }
}
