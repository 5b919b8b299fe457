//! Core domain models for task claiming.
//!
//! Pure, store-independent logic: task records, the lifecycle state
//! machine, and dependency resolution over project snapshots.

pub mod dag;
pub mod lifecycle;
pub mod task;

pub use dag::{BlockedTask, DependencyGraph, GraphNode, SnapshotEntry, TaskSnapshot, UnmetDependency};
pub use lifecycle::TaskStateMachine;
pub use task::{AgentId, Task, TaskId, TaskStatus, TaskUpdate, Version};
