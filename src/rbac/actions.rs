//! Permission required for each status transition.

use crate::core::task::TaskStatus;

pub const CLAIM: &str = "tasks:claim";
pub const START: &str = "tasks:start";
pub const SUBMIT: &str = "tasks:submit";
pub const ABANDON: &str = "tasks:abandon";
pub const REVIEW_APPROVE: &str = "tasks:review:approve";
pub const REVIEW_REJECT: &str = "tasks:review:reject";

/// Permission needed to move a task from `from` to `to`.
///
/// Pairs outside the lifecycle table map to `tasks:claim` so that
/// authorization still runs before the transition is rejected.
pub fn required_permission(from: TaskStatus, to: TaskStatus) -> &'static str {
    match (from, to) {
        (TaskStatus::Claimed, TaskStatus::InProgress) => START,
        (TaskStatus::InProgress, TaskStatus::InReview) => SUBMIT,
        (TaskStatus::InReview, TaskStatus::Completed) => REVIEW_APPROVE,
        (TaskStatus::InReview, TaskStatus::InProgress) => REVIEW_REJECT,
        (TaskStatus::Claimed, TaskStatus::Backlog) => ABANDON,
        _ => CLAIM,
    }
}
