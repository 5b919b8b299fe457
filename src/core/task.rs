//! Task data model shared by the resolver, the lifecycle table and the
//! claim coordinator.
//!
//! Identifiers and version tokens are opaque strings owned by the external
//! task store; this crate only compares and orders them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::Error;

/// Identifier of a task, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a worker agent.
///
/// Agents are passed explicitly into every call; there is no process-wide
/// "current agent".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random agent identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Return first 8 characters for display.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Optimistic concurrency token issued by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task status in its lifecycle.
///
/// Legal moves between these states are defined by
/// [`TaskStateMachine`](crate::core::lifecycle::TaskStateMachine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, unassigned, waiting to be claimed.
    #[default]
    Backlog,
    /// Reserved by an agent, work not yet started.
    Claimed,
    /// An agent is actively working on the task.
    InProgress,
    /// Work submitted and awaiting review.
    InReview,
    /// Accepted. Terminal.
    Completed,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Backlog,
        TaskStatus::Claimed,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Completed => "completed",
        }
    }

    /// Whether an agent currently holds the task.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Claimed | TaskStatus::InProgress | TaskStatus::InReview
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized || normalized == status.as_str().replace('_', ""))
            .ok_or_else(|| Error::Validation(format!("Unknown task status: {}", s)))
    }
}

/// A task record as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the project.
    pub id: TaskId,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Tasks that must be completed before this one can start. May name
    /// tasks absent from the current snapshot.
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// Agent currently holding the task.
    #[serde(default)]
    pub assignee: Option<AgentId>,
    /// Store-issued version token for conditional writes.
    pub version: Version,
    /// Last time the store accepted a write for this task.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task in `Backlog` with no assignee.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            status: TaskStatus::Backlog,
            depends_on: BTreeSet::new(),
            assignee: None,
            version: Version::new("0"),
            updated_at: Utc::now(),
        }
    }

    /// Builder-style helper to declare dependencies.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder-style helper to set the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder-style helper to set the assignee.
    pub fn with_assignee(mut self, agent: AgentId) -> Self {
        self.assignee = Some(agent);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Fields written by a conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub assignee: Option<AgentId>,
}

impl TaskUpdate {
    /// Build the update for moving a task to `target` on behalf of `agent`.
    ///
    /// Returning a task to the backlog releases it.
    pub fn transition(target: TaskStatus, agent: &AgentId) -> Self {
        let assignee = match target {
            TaskStatus::Backlog => None,
            _ => Some(agent.clone()),
        };
        Self {
            status: target,
            assignee,
        }
    }

    pub fn apply(&self, task: &mut Task) {
        task.status = self.status;
        task.assignee = self.assignee.clone();
    }
}
