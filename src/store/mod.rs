//! Boundary to the external task store.
//!
//! The store owns task records and their optimistic version tokens. Its
//! conditional write is the only arbiter of which concurrent claim wins;
//! nothing in this crate holds a lock across a store round trip.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::{Task, TaskId, TaskUpdate, Version};
use crate::rbac::Role;

/// Failures reported by a [`TaskStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record changed since it was read.
    #[error("version conflict on task {task_id}: expected {expected}, found {}", display_version(.actual))]
    VersionConflict {
        task_id: TaskId,
        expected: Version,
        actual: Option<Version>,
    },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

fn display_version(version: &Option<Version>) -> &str {
    version.as_ref().map(Version::as_str).unwrap_or("none")
}

/// Project context resolved once per session by the surrounding tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: String,
    pub org_id: String,
    pub role: Role,
}

impl ProjectContext {
    pub fn new(project_id: impl Into<String>, org_id: impl Into<String>, role: Role) -> Self {
        Self {
            project_id: project_id.into(),
            org_id: org_id.into(),
            role,
        }
    }
}

/// Durable task storage with per-record optimistic versioning.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load one task, including its current version token.
    async fn get_task(&self, id: &TaskId) -> std::result::Result<Task, StoreError>;

    /// Load every task in a project.
    async fn list_tasks_in_project(
        &self,
        project_id: &str,
    ) -> std::result::Result<Vec<Task>, StoreError>;

    /// Apply `update` only if the record is still at `version`.
    ///
    /// Returns the new version token, or [`StoreError::VersionConflict`]
    /// when another writer got there first. A conflicting write leaves the
    /// record untouched.
    async fn conditional_update(
        &self,
        id: &TaskId,
        version: &Version,
        update: TaskUpdate,
    ) -> std::result::Result<Version, StoreError>;
}
