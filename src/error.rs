use thiserror::Error;

use crate::core::task::{TaskId, TaskStatus};
use crate::rbac::Role;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Cyclic dependency: {}", format_cycles(.cycles))]
    CyclicDependency {
        cycles: Vec<Vec<TaskId>>,
        unresolved: Vec<TaskId>,
    },

    #[error("Task {task_id} depends on itself")]
    SelfDependency { task_id: TaskId },

    #[error("Task {task_id} is not ready, unmet dependencies: {}", join_ids(.unmet))]
    TaskNotReady { task_id: TaskId, unmet: Vec<TaskId> },

    #[error("Permission denied: role {role} lacks {requested}")]
    PermissionDenied { role: Role, requested: String },

    #[error("Claim on task {task_id} lost to a concurrent update after {attempts} attempt(s)")]
    ClaimConflict { task_id: TaskId, attempts: u32 },

    #[error("Claim on task {task_id} was cancelled")]
    Cancelled { task_id: TaskId },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Invalid permission '{pattern}': {reason}")]
    InvalidPermission { pattern: String, reason: String },
}

impl Error {
    /// Whether the claim loop may retry after this error.
    ///
    /// Only optimistic version conflicts from the store qualify; every
    /// validation failure is final for the attempt that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(StoreError::VersionConflict { .. }))
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_cycles(cycles: &[Vec<TaskId>]) -> String {
    if cycles.is_empty() {
        return "no cycle path recovered".to_string();
    }
    cycles
        .iter()
        .map(|cycle| {
            cycle
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
