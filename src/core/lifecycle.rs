//! Task lifecycle transition table.
//!
//! The table is a `const` and the state machine holds no data, so it can be
//! shared freely between threads.

use crate::core::task::TaskStatus;
use crate::error::{Error, Result};

/// Legal `(from, to)` status pairs, in declaration order.
///
/// Forward edges first, then the two regression edges:
/// review rejected (`InReview -> InProgress`) and claim abandoned
/// (`Claimed -> Backlog`).
const TRANSITIONS: &[(TaskStatus, TaskStatus)] = &[
    (TaskStatus::Backlog, TaskStatus::Claimed),
    (TaskStatus::Claimed, TaskStatus::InProgress),
    (TaskStatus::InProgress, TaskStatus::InReview),
    (TaskStatus::InReview, TaskStatus::Completed),
    (TaskStatus::InReview, TaskStatus::InProgress),
    (TaskStatus::Claimed, TaskStatus::Backlog),
];

/// Validates status transitions for a single task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    pub const fn new() -> Self {
        Self
    }

    /// The declared transition table.
    pub fn transitions(&self) -> &'static [(TaskStatus, TaskStatus)] {
        TRANSITIONS
    }

    /// Check whether `from -> to` is a legal transition.
    pub fn can_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        TRANSITIONS.contains(&(from, to))
    }

    /// Return an error naming the pair if `from -> to` is illegal.
    pub fn validate_transition(&self, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from, to })
        }
    }

    /// Statuses reachable from `from` in one legal step, in table order.
    pub fn next_statuses(&self, from: TaskStatus) -> Vec<TaskStatus> {
        TRANSITIONS
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn is_terminal(&self, status: TaskStatus) -> bool {
        status == TaskStatus::Completed
    }

    /// Whether `from -> to` is one of the legal backward edges.
    pub fn is_regression(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.can_transition(from, to) && to < from
    }
}
